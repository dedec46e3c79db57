//! Retry and backoff policy.
//!
//! Error classification (network, authentication, full section, conflict,
//! remote system failures) plus the per-kind backoff table, shared by the
//! batch orchestrator and the persistent selector.

mod classify;
mod policy;
mod run;

pub use classify::{classify, Classifier, Rule};
pub use policy::{ErrorKind, MaxAttempts, PolicyTable, RetryDecision, RetryPolicy};
pub use run::{attempt_once, run_with_retry, RetryContext, TargetReport};
