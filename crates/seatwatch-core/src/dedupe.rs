//! Collapse concurrent identical requests into one in-flight call.
//!
//! Callers sharing a key while a call is in flight are attached to that call
//! and observe its exact result. Entries leave the map as soon as the call
//! settles, success or failure; this is not a cache.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::lock;

type InflightCall<T> = Shared<BoxFuture<'static, T>>;

struct Inflight<T> {
    next_generation: u64,
    calls: HashMap<String, (u64, InflightCall<T>)>,
}

/// Shared registry of in-flight calls keyed by a caller-supplied identity.
pub struct Deduplicator<T> {
    inflight: Arc<Mutex<Inflight<T>>>,
}

impl<T> Clone for Deduplicator<T> {
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
        }
    }
}

impl<T> Default for Deduplicator<T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(Inflight {
                next_generation: 0,
                calls: HashMap::new(),
            })),
        }
    }
}

/// Removes its registry entry when the wrapped call finishes or is dropped.
///
/// The generation check keeps a late guard from evicting a newer call that
/// reused the key.
struct Removal<T> {
    inflight: Arc<Mutex<Inflight<T>>>,
    key: String,
    generation: u64,
}

impl<T> Drop for Removal<T> {
    fn drop(&mut self) {
        let removed = {
            let mut inflight = lock(&self.inflight);
            match inflight.calls.get(&self.key) {
                Some((generation, _)) if *generation == self.generation => {
                    inflight.calls.remove(&self.key)
                }
                _ => None,
            }
        };
        drop(removed);
    }
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` under `key`, or join the call already in flight for it.
    pub async fn dedupe<F, Fut>(&self, key: impl Into<String>, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let key = key.into();
        let call = {
            let mut inflight = lock(&self.inflight);
            if let Some((_, call)) = inflight.calls.get(&key) {
                tracing::debug!(key = %key, "joining in-flight call");
                call.clone()
            } else {
                let generation = inflight.next_generation;
                inflight.next_generation += 1;
                let guard = Removal {
                    inflight: Arc::clone(&self.inflight),
                    key: key.clone(),
                    generation,
                };
                let fut = operation();
                let call = async move {
                    let _guard = guard;
                    fut.await
                }
                .boxed()
                .shared();
                inflight.calls.insert(key, (generation, call.clone()));
                call
            }
        };
        call.await
    }

    /// Number of keys with a call currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_call() {
        let dedupe: Deduplicator<u32> = Deduplicator::new();
        let counter = Arc::new(AtomicU32::new(0));

        let calls = (0..5).map(|_| {
            let counter = Arc::clone(&counter);
            dedupe.dedupe("enroll:CS101", move || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst) + 100
            })
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == 100));
        assert_eq!(dedupe.in_flight(), 0);
    }

    #[tokio::test]
    async fn failure_is_shared_then_cleared() {
        let dedupe: Deduplicator<Result<u32, String>> = Deduplicator::new();
        let counter = Arc::new(AtomicU32::new(0));

        let run = || {
            let counter = Arc::clone(&counter);
            dedupe.dedupe("k", move || async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>("HTTP 503".to_string())
            })
        };
        let (a, b) = tokio::join!(run(), run());
        assert_eq!(a, Err("HTTP 503".to_string()));
        assert_eq!(a, b);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // The failed call no longer blocks the key.
        assert!(run().await.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(dedupe.in_flight(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let dedupe: Deduplicator<&'static str> = Deduplicator::new();
        let (a, b) = tokio::join!(
            dedupe.dedupe("a", || async { "a" }),
            dedupe.dedupe("b", || async { "b" }),
        );
        assert_eq!((a, b), ("a", "b"));
    }

    #[tokio::test]
    async fn abandoned_call_stays_joinable() {
        let dedupe: Deduplicator<u32> = Deduplicator::new();
        {
            let pending = dedupe.dedupe("k", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                1
            });
            // Poll once so the call registers, then drop it.
            let _ = futures::poll!(Box::pin(pending));
        }
        assert_eq!(dedupe.in_flight(), 1);
        // A later caller joins and drives the registered call itself.
        let value = tokio::time::timeout(
            Duration::from_millis(10),
            dedupe.dedupe("k", || async { 2 }),
        )
        .await;
        assert!(value.is_err());
    }
}
