//! Adapter that replays canned replies, for dry runs and tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::lock;
use crate::target::{AttemptTarget, RemoteReply, TargetId};

use super::RemoteAdapter;

/// One scripted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Reply(RemoteReply),
    /// The adapter call itself fails (transport error, parse failure).
    Error(String),
}

impl ScriptStep {
    pub fn ok(message: impl Into<String>) -> Self {
        ScriptStep::Reply(RemoteReply::success(message))
    }

    pub fn fail(message: impl Into<String>) -> Self {
        ScriptStep::Reply(RemoteReply::failure(message))
    }

    pub fn error(message: impl Into<String>) -> Self {
        ScriptStep::Error(message.into())
    }
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<ScriptStep>,
    last: Option<ScriptStep>,
    calls: u32,
}

impl Script {
    /// Next step; the final step repeats once the script runs out.
    fn next(&mut self) -> Option<ScriptStep> {
        self.calls += 1;
        if let Some(step) = self.steps.pop_front() {
            self.last = Some(step.clone());
            return Some(step);
        }
        self.last.clone()
    }
}

/// Replays a per-target sequence of replies.
#[derive(Debug, Default)]
pub struct ScriptedAdapter {
    scripts: Mutex<HashMap<TargetId, Script>>,
    latency: Duration,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_script(self, id: TargetId, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        self.set_script(id, steps);
        self
    }

    /// Replace the script for one target and reset its call counter.
    pub fn set_script(&self, id: TargetId, steps: impl IntoIterator<Item = ScriptStep>) {
        let script = Script {
            steps: steps.into_iter().collect(),
            ..Script::default()
        };
        lock(&self.scripts).insert(id, script);
    }

    /// Number of calls made for `id` so far.
    pub fn calls(&self, id: &TargetId) -> u32 {
        lock(&self.scripts).get(id).map(|s| s.calls).unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        lock(&self.scripts).values().map(|s| s.calls).sum()
    }
}

#[async_trait]
impl RemoteAdapter for ScriptedAdapter {
    async fn attempt(&self, target: &AttemptTarget) -> anyhow::Result<RemoteReply> {
        let step = lock(&self.scripts)
            .get_mut(&target.id)
            .and_then(Script::next);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match step {
            Some(ScriptStep::Reply(reply)) => Ok(reply),
            Some(ScriptStep::Error(msg)) => Err(anyhow::anyhow!(msg)),
            None => anyhow::bail!("no script for target {}", target.id),
        }
    }
}
