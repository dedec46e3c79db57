//! Shared helpers for seatwatch-core integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use seatwatch_core::adapter::{RemoteAdapter, ScriptStep, ScriptedAdapter};
use seatwatch_core::retry::PolicyTable;
use seatwatch_core::target::{AttemptTarget, RemoteReply, TargetId};
use seatwatch_core::Engine;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn target(id: &str) -> AttemptTarget {
    AttemptTarget::new(TargetId::new(id), format!("Section {id}"))
}

pub fn targets(ids: &[&str]) -> Vec<AttemptTarget> {
    ids.iter().map(|id| target(id)).collect()
}

/// Adapter that answers every target the same way after a fixed latency,
/// and records the peak number of overlapping calls.
pub struct CountingAdapter {
    latency: Duration,
    fail_with: Option<String>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingAdapter {
    pub fn succeeding(latency: Duration) -> Self {
        Self {
            latency,
            fail_with: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(latency: Duration, message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::succeeding(latency)
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteAdapter for CountingAdapter {
    async fn attempt(&self, _target: &AttemptTarget) -> anyhow::Result<RemoteReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(match &self.fail_with {
            Some(message) => RemoteReply::failure(message.clone()),
            None => RemoteReply::success("Enrolled"),
        })
    }
}

/// Adapter whose first call panics; later calls enroll.
#[derive(Default)]
pub struct PanicOnceAdapter {
    panicked: AtomicBool,
}

#[async_trait]
impl RemoteAdapter for PanicOnceAdapter {
    async fn attempt(&self, target: &AttemptTarget) -> anyhow::Result<RemoteReply> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("adapter blew up on {}", target.id);
        }
        Ok(RemoteReply::success("Enrolled"))
    }
}

/// Script every listed target with the given steps.
pub fn scripted(entries: &[(&str, Vec<ScriptStep>)]) -> ScriptedAdapter {
    entries
        .iter()
        .fold(ScriptedAdapter::new(), |adapter, (id, steps)| {
            adapter.with_script(TargetId::new(*id), steps.clone())
        })
}

pub fn engine(adapter: Arc<dyn RemoteAdapter>, slots: usize) -> Engine {
    Engine::new(adapter, PolicyTable::default(), slots).unwrap()
}
