//! Task identity, lifecycle state and status snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::target::AttemptOutcome;

/// Identifier handed out by `TaskManager::submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a managed task. Moves forward only:
/// `Queued → Running → {Succeeded | Failed | Stopped}`, or `Queued → Stopped`
/// when cancelled before it ever ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Stopped => "stopped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Stopped
        )
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, next),
            (Queued, Running) | (Queued, Stopped) | (Running, Succeeded | Failed | Stopped)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub label: String,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub last_outcome: Option<AttemptOutcome>,
}

impl TaskStatus {
    pub(super) fn queued(id: TaskId, label: String) -> Self {
        Self {
            id,
            label,
            state: TaskState::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            last_attempt_at: None,
            attempt_count: 0,
            last_outcome: None,
        }
    }

    /// Apply a state change if the lifecycle allows it. Returns whether it applied.
    pub(super) fn transition(&mut self, next: TaskState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == TaskState::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.state = next;
        true
    }

    pub(super) fn record_attempt(&mut self, outcome: &AttemptOutcome) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_at = Some(outcome.timestamp);
        self.last_outcome = Some(outcome.clone());
    }
}

/// Admission counters for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub active: usize,
    pub queued: usize,
    pub max_concurrency: usize,
}
