//! Retry loop: attempt a target until success or the policy says stop.

use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::adapter::RemoteAdapter;
use crate::dedupe::Deduplicator;
use crate::target::{AttemptOutcome, AttemptTarget, RemoteReply, TargetId};

use super::classify::Classifier;
use super::policy::{ErrorKind, PolicyTable, RetryDecision};

/// Everything a target attempt needs, cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct RetryContext {
    pub adapter: Arc<dyn RemoteAdapter>,
    pub classifier: Arc<Classifier>,
    pub policies: Arc<PolicyTable>,
    pub dedupe: Deduplicator<Result<RemoteReply, String>>,
}

impl RetryContext {
    pub fn new(adapter: Arc<dyn RemoteAdapter>, policies: PolicyTable) -> Self {
        Self {
            adapter,
            classifier: Classifier::shared(),
            policies: Arc::new(policies),
            dedupe: Deduplicator::new(),
        }
    }
}

/// Final result for one target plus every attempt that led to it.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetReport {
    pub target: TargetId,
    pub outcome: AttemptOutcome,
    pub history: Vec<AttemptOutcome>,
    /// Retrying was cut short by cancellation.
    pub stopped: bool,
}

/// Make one adapter call (deduplicated by target identity) and classify it.
pub async fn attempt_once(ctx: &RetryContext, target: &AttemptTarget, attempt: u32) -> AttemptOutcome {
    let adapter = Arc::clone(&ctx.adapter);
    let owned = target.clone();
    let reply = ctx
        .dedupe
        .dedupe(target.dedupe_key(), move || async move {
            adapter
                .attempt(&owned)
                .await
                .map_err(|e| format!("{:#}", e))
        })
        .await;

    match reply {
        Ok(reply) if reply.succeeded => AttemptOutcome::success(attempt, reply.raw_message),
        Ok(reply) => {
            let kind = ctx.classifier.classify(&reply.raw_message);
            AttemptOutcome::failure(attempt, kind, reply.raw_message)
        }
        Err(message) => {
            let kind = ctx.classifier.classify(&message);
            AttemptOutcome::failure(attempt, kind, message)
        }
    }
}

/// Attempt `target` until it succeeds, the policy for its error kind says
/// stop, the next delay would overrun `deadline`, or `cancel` fires.
///
/// Cancellation is checked before every attempt and interrupts backoff
/// sleeps; an adapter call already in flight is always allowed to finish.
pub async fn run_with_retry<F>(
    ctx: &RetryContext,
    target: &AttemptTarget,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    mut on_attempt: F,
) -> TargetReport
where
    F: FnMut(&AttemptOutcome),
{
    let mut history: Vec<AttemptOutcome> = Vec::new();
    let mut stopped = false;
    let mut attempt = 1u32;

    loop {
        if cancel.is_cancelled() {
            stopped = true;
            break;
        }

        let outcome = attempt_once(ctx, target, attempt).await;
        on_attempt(&outcome);
        let succeeded = outcome.succeeded;
        let kind = outcome.kind.unwrap_or(ErrorKind::Unknown);
        history.push(outcome);
        if succeeded {
            tracing::info!(target_id = %target.id, attempt, "attempt succeeded");
            break;
        }

        match ctx.policies.decide(kind, attempt) {
            RetryDecision::NoRetry => {
                tracing::debug!(target_id = %target.id, attempt, %kind, "not retrying");
                break;
            }
            RetryDecision::RetryAfter(delay) => {
                if deadline.is_some_and(|d| Instant::now() + delay > d) {
                    tracing::debug!(target_id = %target.id, attempt, %kind, "time budget exhausted");
                    break;
                }
                tracing::warn!(
                    target_id = %target.id,
                    attempt,
                    %kind,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        stopped = true;
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }

    let outcome = history
        .last()
        .cloned()
        .unwrap_or_else(|| AttemptOutcome::not_attempted("stopped before first attempt"));
    TargetReport {
        target: target.id.clone(),
        outcome,
        history,
        stopped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ScriptStep, ScriptedAdapter};
    use crate::retry::policy::{MaxAttempts, RetryPolicy};
    use std::time::Duration;

    fn fast_table() -> PolicyTable {
        let quick = |max| RetryPolicy {
            max_attempts: max,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            exponential_base: 2.0,
        };
        PolicyTable::default()
            .with_policy(ErrorKind::NetworkError, quick(MaxAttempts::Limited(2)))
            .with_policy(ErrorKind::ResourceExhausted, quick(MaxAttempts::Unlimited))
    }

    fn setup(steps: Vec<ScriptStep>) -> (Arc<ScriptedAdapter>, RetryContext, AttemptTarget) {
        let target = AttemptTarget::new(TargetId::new("CS101:01"), "Intro CS");
        let adapter = Arc::new(ScriptedAdapter::new().with_script(target.id.clone(), steps));
        let ctx = RetryContext::new(adapter.clone(), fast_table());
        (adapter, ctx, target)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_full_section_until_success() {
        let (adapter, ctx, target) = setup(vec![
            ScriptStep::fail("Section full"),
            ScriptStep::fail("Section full"),
            ScriptStep::ok("Enrolled"),
        ]);
        let mut seen = 0;
        let report =
            run_with_retry(&ctx, &target, &CancellationToken::new(), None, |_| seen += 1).await;
        assert!(report.outcome.succeeded);
        assert_eq!(report.outcome.attempt, 3);
        assert_eq!(report.history.len(), 3);
        assert_eq!(report.history[0].kind, Some(ErrorKind::ResourceExhausted));
        assert_eq!(seen, 3);
        assert_eq!(adapter.calls(&target.id), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_kind_stops_after_one_attempt() {
        let (adapter, ctx, target) = setup(vec![ScriptStep::fail("Timetable conflict")]);
        let report = run_with_retry(&ctx, &target, &CancellationToken::new(), None, |_| {}).await;
        assert!(!report.outcome.succeeded);
        assert_eq!(report.outcome.kind, Some(ErrorKind::ResourceConflict));
        assert_eq!(report.outcome.message, "Timetable conflict");
        assert_eq!(adapter.calls(&target.id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_kind_gives_up_after_budget() {
        let (adapter, ctx, target) = setup(vec![ScriptStep::error("connection reset by peer")]);
        let report = run_with_retry(&ctx, &target, &CancellationToken::new(), None, |_| {}).await;
        // First attempt plus two retries.
        assert_eq!(adapter.calls(&target.id), 3);
        assert_eq!(report.outcome.kind, Some(ErrorKind::NetworkError));
        assert!(!report.stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_retries_short() {
        let (adapter, ctx, target) = setup(vec![ScriptStep::fail("Section full")]);
        let deadline = Instant::now() + Duration::from_millis(50);
        let report =
            run_with_retry(&ctx, &target, &CancellationToken::new(), Some(deadline), |_| {}).await;
        assert!(!report.outcome.succeeded);
        assert!(adapter.calls(&target.id) >= 2);
        assert!(Instant::now() <= deadline);
    }

    #[tokio::test]
    async fn cancelled_before_start_records_not_attempted() {
        let (adapter, ctx, target) = setup(vec![ScriptStep::ok("Enrolled")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = run_with_retry(&ctx, &target, &cancel, None, |_| {}).await;
        assert!(report.stopped);
        assert_eq!(report.outcome.attempt, 0);
        assert!(report.history.is_empty());
        assert_eq!(adapter.calls(&target.id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_backoff_sleep() {
        let (adapter, ctx, target) = setup(vec![ScriptStep::fail("Section full")]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let report = run_with_retry(&ctx, &target, &cancel, None, move |o| {
            if o.attempt == 2 {
                trigger.cancel();
            }
        })
        .await;
        assert!(report.stopped);
        assert_eq!(adapter.calls(&target.id), 2);
        assert_eq!(report.outcome.kind, Some(ErrorKind::ResourceExhausted));
    }

    #[test]
    fn contexts_share_the_builtin_classifier() {
        let (_, first, _) = setup(vec![ScriptStep::ok("Enrolled")]);
        let (_, second, _) = setup(vec![ScriptStep::ok("Enrolled")]);
        assert!(Arc::ptr_eq(&first.classifier, &second.classifier));
        assert!(std::ptr::eq(&*first.classifier, Classifier::builtin()));
    }
}
