//! Batch orchestrator: drive a fixed target list in paced, bounded chunks.
//!
//! Targets are split into consecutive chunks of at most `batch_size`. Every
//! member of a chunk runs its own classify→decide→retry loop concurrently;
//! the next chunk starts only after all members settle and the inter-batch
//! delay has passed. One target giving up never aborts its siblings.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::retry::{run_with_retry, ErrorKind, RetryContext, TargetReport};
use crate::target::{AttemptOutcome, AttemptTarget};

pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_millis(1000);

/// Per-call pacing for `run_batch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum chunk members attempted concurrently.
    pub batch_size: usize,
    /// Pause between chunks (not after the last one).
    pub inter_batch_delay: Duration,
    /// Retry time budget for the whole invocation; `None` means unbounded.
    pub time_budget: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
            time_budget: None,
        }
    }
}

impl BatchOptions {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.batch_size == 0 {
            return Err(EngineError::InvalidBatchSize(self.batch_size));
        }
        if self.inter_batch_delay.is_zero() {
            return Err(EngineError::InvalidInterval(0));
        }
        Ok(())
    }
}

/// Aggregate result of one batch. `reports[i]` belongs to input target `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub reports: Vec<TargetReport>,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks: usize,
    /// Inter-batch delays actually slept.
    pub pauses: usize,
    /// The batch was cancelled before every target finished on its own.
    pub stopped: bool,
}

impl BatchReport {
    /// Final outcomes in input order.
    pub fn outcomes(&self) -> impl Iterator<Item = &AttemptOutcome> {
        self.reports.iter().map(|r| &r.outcome)
    }
}

/// Summary counts suitable for a front door response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl From<&BatchReport> for BatchCounts {
    fn from(report: &BatchReport) -> Self {
        Self {
            total: report.reports.len(),
            succeeded: report.succeeded,
            failed: report.failed,
        }
    }
}

/// Run every target through the retry loop, chunk by chunk.
///
/// `on_attempt` sees every individual attempt as it happens (used to feed
/// task status). Returns exactly one report per input target, in input order.
pub async fn run_batch<O>(
    ctx: &RetryContext,
    targets: &[AttemptTarget],
    opts: &BatchOptions,
    cancel: &CancellationToken,
    on_attempt: O,
) -> Result<BatchReport, EngineError>
where
    O: Fn(&AttemptOutcome) + Clone + Send + 'static,
{
    if targets.is_empty() {
        return Err(EngineError::EmptyTargets);
    }
    opts.validate()?;

    let deadline = opts.time_budget.map(|budget| Instant::now() + budget);
    let chunk_count = targets.len().div_ceil(opts.batch_size);
    let mut reports: Vec<TargetReport> = Vec::with_capacity(targets.len());
    let mut pauses = 0usize;

    tracing::info!(
        targets = targets.len(),
        batch_size = opts.batch_size,
        chunks = chunk_count,
        "batch started"
    );

    for (chunk_index, chunk) in targets.chunks(opts.batch_size).enumerate() {
        if chunk_index > 0 && !cancel.is_cancelled() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(opts.inter_batch_delay) => pauses += 1,
            }
        }
        tracing::debug!(chunk = chunk_index + 1, of = chunk_count, size = chunk.len(), "chunk started");

        let mut set = JoinSet::new();
        for (slot, target) in chunk.iter().enumerate() {
            let ctx = ctx.clone();
            let target = target.clone();
            let cancel = cancel.clone();
            let on_attempt = on_attempt.clone();
            set.spawn(async move {
                let report = run_with_retry(&ctx, &target, &cancel, deadline, on_attempt).await;
                (slot, report)
            });
        }

        let mut settled: Vec<Option<TargetReport>> = vec![None; chunk.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, report)) => settled[slot] = Some(report),
                Err(e) => tracing::warn!(error = %e, "target attempt task did not complete"),
            }
        }
        for (report, target) in settled.into_iter().zip(chunk) {
            reports.push(report.unwrap_or_else(|| TargetReport {
                target: target.id.clone(),
                outcome: AttemptOutcome::failure(0, ErrorKind::Unknown, "attempt task panicked"),
                history: Vec::new(),
                stopped: false,
            }));
        }
    }

    let succeeded = reports.iter().filter(|r| r.outcome.succeeded).count();
    let failed = reports.len() - succeeded;
    let stopped = reports.iter().any(|r| r.stopped);
    tracing::info!(succeeded, failed, pauses, stopped, "batch finished");

    Ok(BatchReport {
        reports,
        succeeded,
        failed,
        chunks: chunk_count,
        pauses,
        stopped,
    })
}
