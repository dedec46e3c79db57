//! Persistent selector: one long-running "keep trying until it works" job.
//!
//! A selector owns a single job at a time. The job cycles through its
//! targets in list order, one attempt at a time with a fixed interval
//! between attempts, until a target succeeds (first success wins), the
//! shared attempt budget runs out, every target has been retired by the
//! policy table, or `stop` is called.
//!
//! States: `Idle → Running → {Succeeded, Exhausted, Stopped}`. A finished
//! selector returns to `Idle` through `reset`, which `start` also performs.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::EngineError;
use crate::lock;
use crate::retry::{attempt_once, ErrorKind, RetryContext};
use crate::target::{AttemptOutcome, AttemptTarget, TargetId};
use crate::task::{TaskContext, TaskId, TaskManager, TaskVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorPhase {
    Idle,
    Running,
    Succeeded,
    Exhausted,
    Stopped,
}

impl SelectorPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SelectorPhase::Succeeded | SelectorPhase::Exhausted | SelectorPhase::Stopped
        )
    }
}

impl fmt::Display for SelectorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SelectorPhase::Idle => "idle",
            SelectorPhase::Running => "running",
            SelectorPhase::Succeeded => "succeeded",
            SelectorPhase::Exhausted => "exhausted",
            SelectorPhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Snapshot of the selector's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorState {
    pub state: SelectorPhase,
    pub targets: Vec<AttemptTarget>,
    /// Index of the target being (or last) attempted.
    pub current_index: usize,
    pub max_attempts: u32,
    pub interval_ms: u64,
    /// Attempts made so far across all targets.
    pub attempts: u32,
    /// Latest outcome per attempted target.
    pub results: BTreeMap<TargetId, AttemptOutcome>,
    /// Targets the policy table will not retry any more.
    pub retired: Vec<TargetId>,
    pub winner: Option<TargetId>,
    pub task_id: Option<TaskId>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for SelectorState {
    fn default() -> Self {
        Self {
            state: SelectorPhase::Idle,
            targets: Vec::new(),
            current_index: 0,
            max_attempts: 0,
            interval_ms: 0,
            attempts: 0,
            results: BTreeMap::new(),
            retired: Vec::new(),
            winner: None,
            task_id: None,
            started_at: None,
            finished_at: None,
        }
    }
}

struct Shared {
    state: SelectorState,
    /// Bumped on every start; a loop only writes while its run is current.
    run: u64,
}

/// Handle to one selector. Clones share the same job.
#[derive(Clone)]
pub struct PersistentSelector {
    shared: Arc<Mutex<Shared>>,
    ctx: RetryContext,
    manager: TaskManager,
}

impl PersistentSelector {
    pub fn new(ctx: RetryContext, manager: TaskManager) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                state: SelectorState::default(),
                run: 0,
            })),
            ctx,
            manager,
        }
    }

    /// Start a job over `targets`. Rejected while a job is running; a
    /// finished job is reset first. Returns the managed task running it.
    pub fn start(
        &self,
        targets: Vec<AttemptTarget>,
        max_attempts: u32,
        interval_ms: u64,
    ) -> Result<TaskId, EngineError> {
        if targets.is_empty() {
            return Err(EngineError::EmptyTargets);
        }
        if max_attempts == 0 {
            return Err(EngineError::InvalidMaxAttempts(max_attempts));
        }
        if interval_ms == 0 {
            return Err(EngineError::InvalidInterval(interval_ms));
        }

        let mut shared = lock(&self.shared);
        if shared.state.state == SelectorPhase::Running {
            return Err(EngineError::SelectorAlreadyRunning);
        }
        if shared.state.state.is_terminal() {
            tracing::debug!(previous = %shared.state.state, "resetting finished selector");
        }

        shared.run += 1;
        let run = shared.run;
        tracing::info!(
            targets = targets.len(),
            max_attempts,
            interval_ms,
            "selector started"
        );
        shared.state = SelectorState {
            state: SelectorPhase::Running,
            targets: targets.clone(),
            max_attempts,
            interval_ms,
            started_at: Some(Utc::now()),
            ..SelectorState::default()
        };

        let job = SelectorJob {
            shared: Arc::clone(&self.shared),
            ctx: self.ctx.clone(),
            run,
            targets,
            max_attempts,
            interval: Duration::from_millis(interval_ms),
        };
        let task_id = self.manager.submit("persistent selector", move |task| job.run(task));
        shared.state.task_id = Some(task_id);
        Ok(task_id)
    }

    /// Stop the running job. Takes effect in the snapshot immediately; the
    /// loop itself exits at its next checkpoint. No-op unless running.
    pub fn stop(&self) {
        let mut shared = lock(&self.shared);
        if shared.state.state != SelectorPhase::Running {
            return;
        }
        shared.state.state = SelectorPhase::Stopped;
        shared.state.finished_at = Some(Utc::now());
        if let Some(task_id) = shared.state.task_id {
            if let Err(e) = self.manager.cancel(task_id) {
                tracing::warn!(error = %e, "selector task already gone");
            }
        }
        tracing::info!(attempts = shared.state.attempts, "selector stopped");
    }

    /// Return a finished selector to `Idle`. Rejected while running.
    pub fn reset(&self) -> Result<(), EngineError> {
        let mut shared = lock(&self.shared);
        if shared.state.state == SelectorPhase::Running {
            return Err(EngineError::SelectorAlreadyRunning);
        }
        shared.state = SelectorState::default();
        Ok(())
    }

    pub fn status(&self) -> SelectorState {
        lock(&self.shared).state.clone()
    }
}

/// The loop behind one `start`.
struct SelectorJob {
    shared: Arc<Mutex<Shared>>,
    ctx: RetryContext,
    run: u64,
    targets: Vec<AttemptTarget>,
    max_attempts: u32,
    interval: Duration,
}

impl SelectorJob {
    /// Run the loop; a panic inside it still settles the selector, then
    /// propagates so the task is recorded as failed.
    async fn run(self, task: TaskContext) -> anyhow::Result<TaskVerdict> {
        match AssertUnwindSafe(self.run_loop(&task)).catch_unwind().await {
            Ok(verdict) => Ok(verdict),
            Err(panic) => {
                tracing::warn!("selector loop panicked");
                self.finish(SelectorPhase::Exhausted, None);
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn run_loop(&self, task: &TaskContext) -> TaskVerdict {
        let mut retired = vec![false; self.targets.len()];
        let mut per_target = vec![0u32; self.targets.len()];
        let mut attempts = 0u32;
        let mut next = 0usize;

        loop {
            if task.is_cancelled() {
                return self.finish(SelectorPhase::Stopped, None);
            }
            let Some(index) = next_live(&retired, next) else {
                tracing::info!("every selector target retired");
                return self.finish(SelectorPhase::Exhausted, None);
            };
            self.update(|state| state.current_index = index);

            let target = &self.targets[index];
            per_target[index] += 1;
            let outcome = attempt_once(&self.ctx, target, per_target[index]).await;
            attempts += 1;
            task.record_attempt(&outcome);
            self.update(|state| {
                state.attempts = attempts;
                state.results.insert(target.id.clone(), outcome.clone());
            });

            if outcome.succeeded {
                tracing::info!(target_id = %target.id, attempts, "selector succeeded");
                return self.finish(SelectorPhase::Succeeded, Some(target.id.clone()));
            }

            let kind = outcome.kind.unwrap_or(ErrorKind::Unknown);
            if !self.ctx.policies.allows_retry(kind, per_target[index]) {
                tracing::info!(target_id = %target.id, %kind, "selector target retired");
                retired[index] = true;
                self.update(|state| state.retired.push(target.id.clone()));
            } else {
                tracing::debug!(target_id = %target.id, %kind, attempts, "selector attempt failed");
            }

            if attempts >= self.max_attempts {
                tracing::info!(attempts, "selector attempt budget exhausted");
                return self.finish(SelectorPhase::Exhausted, None);
            }
            if retired.iter().all(|r| *r) {
                tracing::info!("every selector target retired");
                return self.finish(SelectorPhase::Exhausted, None);
            }
            next = (index + 1) % self.targets.len();

            tokio::select! {
                _ = task.cancelled() => return self.finish(SelectorPhase::Stopped, None),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Apply `f` if this job's run is still the selector's current one.
    fn update<F: FnOnce(&mut SelectorState)>(&self, f: F) {
        let mut shared = lock(&self.shared);
        if shared.run == self.run {
            f(&mut shared.state);
        }
    }

    /// Settle the job. A phase already set by `stop` is kept.
    fn finish(&self, phase: SelectorPhase, winner: Option<TargetId>) -> TaskVerdict {
        self.update(|state| {
            if state.state == SelectorPhase::Running {
                state.state = phase;
                state.winner = winner;
                state.finished_at = Some(Utc::now());
            }
        });
        if phase == SelectorPhase::Succeeded {
            TaskVerdict::Succeeded
        } else {
            TaskVerdict::Failed
        }
    }
}

/// First non-retired index at or after `from`, wrapping around.
fn next_live(retired: &[bool], from: usize) -> Option<usize> {
    let n = retired.len();
    (0..n).map(|offset| (from + offset) % n).find(|&i| !retired[i])
}
