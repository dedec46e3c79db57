//! Handle given to running work: cancellation signal and status reporting.

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::target::AttemptOutcome;

use super::status::{TaskId, TaskState, TaskStatus};

/// Passed to every task when it starts running.
///
/// Work must check `is_cancelled` (or await `cancelled`) at its retry and
/// decision points; the manager never interrupts it.
#[derive(Clone)]
pub struct TaskContext {
    id: TaskId,
    cancel: CancellationToken,
    status: Arc<watch::Sender<TaskStatus>>,
}

impl TaskContext {
    pub(super) fn new(
        id: TaskId,
        cancel: CancellationToken,
        status: Arc<watch::Sender<TaskStatus>>,
    ) -> Self {
        Self { id, cancel, status }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Count an attempt and make it the task's last outcome.
    pub fn record_attempt(&self, outcome: &AttemptOutcome) {
        self.status.send_modify(|status| {
            if status.state == TaskState::Running {
                status.record_attempt(outcome);
            }
        });
    }

    pub fn status(&self) -> TaskStatus {
        self.status.borrow().clone()
    }
}
