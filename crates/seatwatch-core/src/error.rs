//! Fatal conditions surfaced to callers of the engine.
//!
//! Per-target failures are never errors: they are reported as
//! `AttemptOutcome`s. Only invalid input and lifecycle conflicts land here.

use crate::task::TaskId;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("target list is empty")]
    EmptyTargets,

    #[error("concurrency must be a positive integer (got {0})")]
    InvalidConcurrency(usize),

    #[error("batch size must be a positive integer (got {0})")]
    InvalidBatchSize(usize),

    #[error("interval must be a positive number of milliseconds (got {0})")]
    InvalidInterval(u64),

    #[error("max attempts must be a positive integer (got {0})")]
    InvalidMaxAttempts(u32),

    #[error("selector is already running")]
    SelectorAlreadyRunning,

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("task {0} was cancelled before it produced a result")]
    Cancelled(TaskId),
}
