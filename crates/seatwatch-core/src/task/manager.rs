//! Slot-bounded task runner with FIFO admission.
//!
//! Keeps up to `max_concurrency` tasks running at once; when one finishes,
//! the oldest queued task takes its slot. Each task is registered with a
//! cancellation token and a status channel, like job abort tokens in a
//! control registry.

use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::lock;
use crate::retry::classify;
use crate::target::AttemptOutcome;

use super::context::TaskContext;
use super::status::{ManagerStats, TaskId, TaskState, TaskStatus};

pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Finished tasks kept for `status`/`wait` before the oldest are dropped.
pub const DEFAULT_FINISHED_RETENTION: usize = 256;

/// How a task's work ended, as judged by the work itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskVerdict {
    Succeeded,
    Failed,
}

type Work = Box<dyn FnOnce(TaskContext) -> BoxFuture<'static, anyhow::Result<TaskVerdict>> + Send>;

struct Pending {
    id: TaskId,
    work: Work,
}

struct Admission {
    max_concurrency: usize,
    active: usize,
    queue: VecDeque<Pending>,
}

struct TaskEntry {
    status: Arc<watch::Sender<TaskStatus>>,
    cancel: CancellationToken,
}

struct Inner {
    admission: Mutex<Admission>,
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
    next_id: AtomicU64,
    finished_retention: AtomicUsize,
}

/// Cheap-to-clone handle to a shared pool of execution slots.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::with_slots(DEFAULT_MAX_CONCURRENCY)
    }
}

impl TaskManager {
    /// Create a manager with `max_concurrency` slots (must be positive).
    pub fn new(max_concurrency: usize) -> Result<Self, EngineError> {
        if max_concurrency == 0 {
            return Err(EngineError::InvalidConcurrency(max_concurrency));
        }
        Ok(Self::with_slots(max_concurrency))
    }

    fn with_slots(max_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                admission: Mutex::new(Admission {
                    max_concurrency,
                    active: 0,
                    queue: VecDeque::new(),
                }),
                tasks: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                finished_retention: AtomicUsize::new(DEFAULT_FINISHED_RETENTION),
            }),
        }
    }

    /// Start `work` in a free slot or queue it behind earlier submissions.
    ///
    /// Must be called from within a Tokio runtime. Errors and panics inside
    /// `work` are caught here and mark the task `Failed`.
    pub fn submit<F, Fut>(&self, label: impl Into<String>, work: F) -> TaskId
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<TaskVerdict>> + Send + 'static,
    {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let label = label.into();
        let (tx, _) = watch::channel(TaskStatus::queued(id, label.clone()));
        {
            let mut tasks = write(&self.inner.tasks);
            tasks.insert(
                id,
                TaskEntry {
                    status: Arc::new(tx),
                    cancel: CancellationToken::new(),
                },
            );
            let retention = self.inner.finished_retention.load(Ordering::Relaxed);
            prune_finished(&mut tasks, retention);
        }

        let work: Work = Box::new(move |ctx| Box::pin(work(ctx)));
        let mut admission = lock(&self.inner.admission);
        if admission.active < admission.max_concurrency {
            admission.active += 1;
            if !self.inner.launch(Pending { id, work }) {
                admission.active -= 1;
            }
        } else {
            tracing::debug!(task = %id, %label, queued = admission.queue.len() + 1, "task queued");
            admission.queue.push_back(Pending { id, work });
        }
        id
    }

    /// Snapshot of one task's status.
    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        read(&self.inner.tasks)
            .get(&id)
            .map(|entry| entry.status.borrow().clone())
    }

    /// Snapshots of every known task, oldest first.
    pub fn list(&self) -> Vec<TaskStatus> {
        let mut all: Vec<TaskStatus> = read(&self.inner.tasks)
            .values()
            .map(|entry| entry.status.borrow().clone())
            .collect();
        all.sort_by_key(|s| s.id);
        all
    }

    /// Cancel a task. A queued task is dropped without running; a running
    /// task is signalled and stops at its next checkpoint. Cancelling a
    /// finished task is a no-op.
    pub fn cancel(&self, id: TaskId) -> Result<(), EngineError> {
        let mut admission = lock(&self.inner.admission);
        let tasks = read(&self.inner.tasks);
        let entry = tasks.get(&id).ok_or(EngineError::TaskNotFound(id))?;
        entry.cancel.cancel();

        if let Some(pos) = admission.queue.iter().position(|p| p.id == id) {
            admission.queue.remove(pos);
            entry.status.send_modify(|s| {
                s.transition(TaskState::Stopped);
            });
            tracing::info!(task = %id, "queued task cancelled");
        } else if entry.status.borrow().state == TaskState::Running {
            tracing::info!(task = %id, "cancellation requested");
        }
        Ok(())
    }

    pub fn max_concurrency(&self) -> usize {
        lock(&self.inner.admission).max_concurrency
    }

    /// Resize the slot pool. Growing admits queued tasks immediately;
    /// shrinking never preempts running ones.
    pub fn set_max_concurrency(&self, n: usize) -> Result<(), EngineError> {
        if n == 0 {
            return Err(EngineError::InvalidConcurrency(n));
        }
        let mut admission = lock(&self.inner.admission);
        admission.max_concurrency = n;
        tracing::info!(max_concurrency = n, "task concurrency updated");
        self.inner.admit(&mut admission);
        Ok(())
    }

    pub fn stats(&self) -> ManagerStats {
        let admission = lock(&self.inner.admission);
        ManagerStats {
            active: admission.active,
            queued: admission.queue.len(),
            max_concurrency: admission.max_concurrency,
        }
    }

    /// Wait until the task reaches a terminal state and return that snapshot.
    pub async fn wait(&self, id: TaskId) -> Result<TaskStatus, EngineError> {
        let mut rx = read(&self.inner.tasks)
            .get(&id)
            .map(|entry| entry.status.subscribe())
            .ok_or(EngineError::TaskNotFound(id))?;
        let status = rx
            .wait_for(|s| s.state.is_terminal())
            .await
            .map_err(|_| EngineError::TaskNotFound(id))?
            .clone();
        Ok(status)
    }

    /// How many finished tasks to remember. Older ones are dropped on the
    /// next `submit`, after which `status` and `wait` no longer know them.
    pub fn set_finished_retention(&self, n: usize) {
        self.inner.finished_retention.store(n, Ordering::Relaxed);
    }

    /// Drop the statuses of finished tasks. Returns how many were removed.
    pub fn forget_finished(&self) -> usize {
        let mut tasks = write(&self.inner.tasks);
        let before = tasks.len();
        tasks.retain(|_, entry| !entry.status.borrow().state.is_terminal());
        before - tasks.len()
    }
}

impl Inner {
    /// Move a task into a slot the caller has already counted in `active`.
    /// Returns `false` if the task is no longer registered.
    fn launch(self: &Arc<Self>, pending: Pending) -> bool {
        let Pending { id, work } = pending;
        let Some((status, cancel)) = read(&self.tasks)
            .get(&id)
            .map(|entry| (Arc::clone(&entry.status), entry.cancel.clone()))
        else {
            tracing::warn!(task = %id, "dropping unregistered task");
            return false;
        };
        status.send_modify(|s| {
            s.transition(TaskState::Running);
        });
        tracing::debug!(task = %id, "task started");

        let ctx = TaskContext::new(id, cancel.clone(), Arc::clone(&status));
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let joined = tokio::spawn(work(ctx)).await;
            finish(id, &status, &cancel, joined);
            inner.release_slot();
        });
        true
    }

    fn release_slot(self: &Arc<Self>) {
        let mut admission = lock(&self.admission);
        admission.active = admission.active.saturating_sub(1);
        self.admit(&mut admission);
    }

    /// Start queued tasks, oldest first, while slots are free.
    fn admit(self: &Arc<Self>, admission: &mut Admission) {
        while admission.active < admission.max_concurrency {
            let Some(next) = admission.queue.pop_front() else {
                break;
            };
            admission.active += 1;
            if !self.launch(next) {
                admission.active -= 1;
            }
        }
    }
}

/// Record how the work ended and move the task to its terminal state.
fn finish(
    id: TaskId,
    status: &watch::Sender<TaskStatus>,
    cancel: &CancellationToken,
    joined: Result<anyhow::Result<TaskVerdict>, tokio::task::JoinError>,
) {
    let (next, failure) = match joined {
        Ok(Ok(TaskVerdict::Succeeded)) => (TaskState::Succeeded, None),
        Ok(Ok(TaskVerdict::Failed)) if cancel.is_cancelled() => (TaskState::Stopped, None),
        Ok(Ok(TaskVerdict::Failed)) => (TaskState::Failed, None),
        Ok(Err(e)) => {
            let message = format!("{:#}", e);
            tracing::warn!(task = %id, error = %message, "task returned an error");
            (TaskState::Failed, Some(message))
        }
        Err(e) => {
            let message = if e.is_panic() {
                "task panicked".to_string()
            } else {
                format!("task aborted: {}", e)
            };
            tracing::warn!(task = %id, error = %message, "task did not complete");
            (TaskState::Failed, Some(message))
        }
    };

    status.send_modify(|s| {
        if let Some(message) = failure {
            let kind = classify(&message);
            s.last_outcome = Some(AttemptOutcome::failure(s.attempt_count, kind, message));
        }
        s.transition(next);
    });
    tracing::debug!(task = %id, state = %next, "task finished");
}

/// Keep at most `retention` finished tasks, dropping the oldest ids first.
fn prune_finished(tasks: &mut HashMap<TaskId, TaskEntry>, retention: usize) {
    let mut finished: Vec<TaskId> = tasks
        .iter()
        .filter(|(_, entry)| entry.status.borrow().state.is_terminal())
        .map(|(id, _)| *id)
        .collect();
    if finished.len() <= retention {
        return;
    }
    finished.sort_unstable();
    let excess = finished.len() - retention;
    for id in &finished[..excess] {
        tasks.remove(id);
    }
    tracing::debug!(dropped = excess, retention, "pruned finished tasks");
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ErrorKind;
    use std::time::Duration;
    use tokio::sync::{mpsc, Semaphore};

    /// Work that blocks until `gate` hands out a permit (or cancellation), logging its start.
    fn gated(
        gate: Arc<Semaphore>,
        started: mpsc::UnboundedSender<TaskId>,
    ) -> impl FnOnce(TaskContext) -> BoxFuture<'static, anyhow::Result<TaskVerdict>> + Send {
        move |ctx| {
            Box::pin(async move {
                let _ = started.send(ctx.id());
                tokio::select! {
                    permit = gate.acquire() => {
                        permit?.forget();
                        Ok(TaskVerdict::Succeeded)
                    }
                    _ = ctx.cancelled() => Ok(TaskVerdict::Failed),
                }
            })
        }
    }

    async fn explode(_ctx: TaskContext) -> anyhow::Result<TaskVerdict> {
        panic!("boom")
    }

    fn states(manager: &TaskManager, ids: &[TaskId]) -> Vec<TaskState> {
        ids.iter()
            .map(|id| manager.status(*id).unwrap().state)
            .collect()
    }

    #[test]
    fn rejects_zero_concurrency() {
        assert_eq!(
            TaskManager::new(0).err(),
            Some(EngineError::InvalidConcurrency(0))
        );
        let manager = TaskManager::default();
        assert_eq!(manager.max_concurrency(), DEFAULT_MAX_CONCURRENCY);
        assert_eq!(
            manager.set_max_concurrency(0),
            Err(EngineError::InvalidConcurrency(0))
        );
        assert_eq!(manager.max_concurrency(), DEFAULT_MAX_CONCURRENCY);
    }

    #[tokio::test]
    async fn one_slot_runs_one_and_queues_the_rest_in_order() {
        let manager = TaskManager::default();
        manager.set_max_concurrency(1).unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let ids: Vec<TaskId> = (0..3)
            .map(|i| manager.submit(format!("job {i}"), gated(Arc::clone(&gate), tx.clone())))
            .collect();

        assert_eq!(
            states(&manager, &ids),
            vec![TaskState::Running, TaskState::Queued, TaskState::Queued]
        );
        assert_eq!(
            manager.stats(),
            ManagerStats {
                active: 1,
                queued: 2,
                max_concurrency: 1
            }
        );

        for expected in &ids {
            assert_eq!(rx.recv().await, Some(*expected));
            gate.add_permits(1);
            let done = manager.wait(*expected).await.unwrap();
            assert_eq!(done.state, TaskState::Succeeded);
        }
        assert_eq!(manager.stats().active, 0);
    }

    #[tokio::test]
    async fn cancelling_a_queued_task_never_runs_it() {
        let manager = TaskManager::new(1).unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = manager.submit("first", gated(Arc::clone(&gate), tx.clone()));
        let second = manager.submit("second", gated(Arc::clone(&gate), tx.clone()));
        manager.cancel(second).unwrap();
        assert_eq!(manager.status(second).unwrap().state, TaskState::Stopped);
        assert!(manager.status(second).unwrap().started_at.is_none());

        assert_eq!(rx.recv().await, Some(first));
        gate.add_permits(1);
        manager.wait(first).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.stats().queued, 0);
    }

    #[tokio::test]
    async fn cancelling_a_running_task_stops_it_cooperatively() {
        let manager = TaskManager::new(2).unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = manager.submit("long", gated(gate, tx));
        assert_eq!(rx.recv().await, Some(id));
        manager.cancel(id).unwrap();
        let done = manager.wait(id).await.unwrap();
        assert_eq!(done.state, TaskState::Stopped);

        // Already finished: no-op.
        manager.cancel(id).unwrap();
        assert_eq!(
            manager.cancel(TaskId(999)),
            Err(EngineError::TaskNotFound(TaskId(999)))
        );
    }

    #[tokio::test]
    async fn errors_and_panics_fail_only_their_task() {
        let manager = TaskManager::new(2).unwrap();
        let erroring = manager.submit("erroring", |_ctx| async {
            Err::<TaskVerdict, _>(anyhow::anyhow!("Connection refused"))
        });
        let panicking = manager.submit("panicking", explode);
        let healthy = manager.submit("healthy", |ctx: TaskContext| async move {
            ctx.record_attempt(&AttemptOutcome::success(1, "Enrolled"));
            Ok::<_, anyhow::Error>(TaskVerdict::Succeeded)
        });

        let failed = manager.wait(erroring).await.unwrap();
        assert_eq!(failed.state, TaskState::Failed);
        let outcome = failed.last_outcome.unwrap();
        assert_eq!(outcome.kind, Some(ErrorKind::NetworkError));
        assert_eq!(outcome.message, "Connection refused");

        let panicked = manager.wait(panicking).await.unwrap();
        assert_eq!(panicked.state, TaskState::Failed);
        assert_eq!(panicked.last_outcome.unwrap().message, "task panicked");

        let ok = manager.wait(healthy).await.unwrap();
        assert_eq!(ok.state, TaskState::Succeeded);
        assert_eq!(ok.attempt_count, 1);
        assert!(ok.last_attempt_at.is_some());
        assert_eq!(manager.stats().active, 0);
    }

    #[tokio::test]
    async fn raising_concurrency_admits_queued_work() {
        let manager = TaskManager::new(1).unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ids: Vec<TaskId> = (0..3)
            .map(|i| manager.submit(format!("job {i}"), gated(Arc::clone(&gate), tx.clone())))
            .collect();

        manager.set_max_concurrency(3).unwrap();
        assert_eq!(states(&manager, &ids), vec![TaskState::Running; 3]);
        for _ in 0..3 {
            assert!(rx.recv().await.is_some());
        }
        gate.add_permits(3);
        for id in &ids {
            let status = tokio::time::timeout(Duration::from_secs(5), manager.wait(*id))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(status.state, TaskState::Succeeded);
        }
        assert_eq!(manager.forget_finished(), 3);
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn finished_tasks_beyond_retention_are_dropped_oldest_first() {
        let manager = TaskManager::new(1).unwrap();
        manager.set_finished_retention(2);
        let mut ids = Vec::new();
        for i in 0..5 {
            let id = manager.submit(format!("job {i}"), |_ctx| async {
                Ok::<_, anyhow::Error>(TaskVerdict::Succeeded)
            });
            manager.wait(id).await.unwrap();
            ids.push(id);
        }
        let gate = Arc::new(Semaphore::new(0));
        let (tx, _rx) = mpsc::unbounded_channel();
        let last = manager.submit("last", gated(Arc::clone(&gate), tx));

        let kept: Vec<TaskId> = manager.list().iter().map(|s| s.id).collect();
        assert_eq!(kept, vec![ids[3], ids[4], last]);
        assert!(manager.status(ids[0]).is_none());
        assert!(matches!(
            manager.wait(ids[0]).await,
            Err(EngineError::TaskNotFound(_))
        ));

        gate.add_permits(1);
        assert_eq!(manager.wait(last).await.unwrap().state, TaskState::Succeeded);
    }
}
