//! Bounded task manager.
//!
//! A fixed number of execution slots (`max_concurrency`, adjustable at
//! runtime) with FIFO admission, per-task status snapshots and cooperative
//! cancellation. Batches and the persistent selector both run as tasks here.

mod context;
mod manager;
mod status;

pub use context::TaskContext;
pub use manager::{TaskManager, TaskVerdict, DEFAULT_FINISHED_RETENTION, DEFAULT_MAX_CONCURRENCY};
pub use status::{ManagerStats, TaskId, TaskState, TaskStatus};
