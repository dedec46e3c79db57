//! Composition root: one retry context, one task pool, one selector.
//!
//! `Engine` is what a front door holds. Every operation it exposes validates
//! its input up front and reports fatal conditions as `EngineError`;
//! per-target failures only ever show up inside reports and snapshots.

use std::sync::Arc;
use tokio::sync::oneshot;

use crate::adapter::RemoteAdapter;
use crate::batch::{run_batch, BatchCounts, BatchOptions, BatchReport};
use crate::config::{SeatwatchConfig, SelectorConfig};
use crate::error::EngineError;
use crate::retry::{PolicyTable, RetryContext};
use crate::selector::{PersistentSelector, SelectorState};
use crate::target::AttemptTarget;
use crate::task::{ManagerStats, TaskId, TaskManager, TaskStatus, TaskVerdict};

/// A batch submitted to the task pool.
#[derive(Debug)]
pub struct BatchHandle {
    pub task_id: TaskId,
    report: oneshot::Receiver<BatchReport>,
}

impl BatchHandle {
    /// Wait for the batch report. A batch cancelled while still queued
    /// never runs and yields `EngineError::Cancelled`.
    pub async fn report(self) -> Result<BatchReport, EngineError> {
        self.report
            .await
            .map_err(|_| EngineError::Cancelled(self.task_id))
    }
}

#[derive(Clone)]
pub struct Engine {
    ctx: RetryContext,
    manager: TaskManager,
    selector: PersistentSelector,
    batch_defaults: BatchOptions,
    selector_defaults: SelectorConfig,
}

impl Engine {
    pub fn new(
        adapter: Arc<dyn RemoteAdapter>,
        policies: PolicyTable,
        max_concurrency: usize,
    ) -> Result<Self, EngineError> {
        let ctx = RetryContext::new(adapter, policies);
        let manager = TaskManager::new(max_concurrency)?;
        let selector = PersistentSelector::new(ctx.clone(), manager.clone());
        Ok(Self {
            ctx,
            manager,
            selector,
            batch_defaults: BatchOptions::default(),
            selector_defaults: SelectorConfig::default(),
        })
    }

    pub fn from_config(
        cfg: &SeatwatchConfig,
        adapter: Arc<dyn RemoteAdapter>,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;
        let mut engine = Self::new(adapter, cfg.policy_table(), cfg.max_concurrency)?;
        engine.batch_defaults = cfg.batch_options();
        engine.selector_defaults = cfg.selector;
        Ok(engine)
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.ctx.policies
    }

    pub fn batch_defaults(&self) -> &BatchOptions {
        &self.batch_defaults
    }

    pub fn selector_defaults(&self) -> SelectorConfig {
        self.selector_defaults
    }

    /// Queue a batch as one managed task and return immediately.
    pub fn submit_batch(
        &self,
        targets: Vec<AttemptTarget>,
        opts: BatchOptions,
    ) -> Result<BatchHandle, EngineError> {
        if targets.is_empty() {
            return Err(EngineError::EmptyTargets);
        }
        opts.validate()?;

        let (tx, rx) = oneshot::channel();
        let ctx = self.ctx.clone();
        let label = format!("batch of {}", targets.len());
        let task_id = self.manager.submit(label, move |task| async move {
            let recorder = task.clone();
            let report = run_batch(
                &ctx,
                &targets,
                &opts,
                task.cancellation_token(),
                move |outcome| recorder.record_attempt(outcome),
            )
            .await?;
            let verdict = if report.stopped {
                TaskVerdict::Failed
            } else {
                TaskVerdict::Succeeded
            };
            if tx.send(report).is_err() {
                tracing::debug!(task = %task.id(), "batch report dropped by caller");
            }
            Ok::<_, anyhow::Error>(verdict)
        });
        Ok(BatchHandle {
            task_id,
            report: rx,
        })
    }

    /// Run a batch and wait for its report.
    pub async fn run_batch(
        &self,
        targets: Vec<AttemptTarget>,
        opts: BatchOptions,
    ) -> Result<BatchReport, EngineError> {
        self.submit_batch(targets, opts)?.report().await
    }

    /// `run_batch` with the configured batch options, plus summary counts.
    pub async fn run_batch_default(
        &self,
        targets: Vec<AttemptTarget>,
    ) -> Result<(BatchReport, BatchCounts), EngineError> {
        let report = self.run_batch(targets, self.batch_defaults.clone()).await?;
        let counts = BatchCounts::from(&report);
        Ok((report, counts))
    }

    pub fn max_concurrency(&self) -> usize {
        self.manager.max_concurrency()
    }

    pub fn set_max_concurrency(&self, n: usize) -> Result<(), EngineError> {
        self.manager.set_max_concurrency(n)
    }

    pub fn stats(&self) -> ManagerStats {
        self.manager.stats()
    }

    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.manager.status(id)
    }

    pub fn tasks(&self) -> Vec<TaskStatus> {
        self.manager.list()
    }

    pub fn cancel_task(&self, id: TaskId) -> Result<(), EngineError> {
        self.manager.cancel(id)
    }

    pub async fn wait(&self, id: TaskId) -> Result<TaskStatus, EngineError> {
        self.manager.wait(id).await
    }

    /// Drop the statuses of finished tasks; returns how many were dropped.
    /// The pool also keeps only the most recent finished tasks on its own.
    pub fn forget_finished(&self) -> usize {
        self.manager.forget_finished()
    }

    pub fn start_selector(
        &self,
        targets: Vec<AttemptTarget>,
        max_attempts: Option<u32>,
        interval_ms: Option<u64>,
    ) -> Result<TaskId, EngineError> {
        self.selector.start(
            targets,
            max_attempts.unwrap_or(self.selector_defaults.max_attempts),
            interval_ms.unwrap_or(self.selector_defaults.interval_ms),
        )
    }

    pub fn stop_selector(&self) {
        self.selector.stop()
    }

    pub fn selector_status(&self) -> SelectorState {
        self.selector.status()
    }

    pub fn reset_selector(&self) -> Result<(), EngineError> {
        self.selector.reset()
    }

    pub fn selector(&self) -> &PersistentSelector {
        &self.selector
    }
}
