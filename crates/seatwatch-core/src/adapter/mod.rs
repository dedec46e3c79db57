//! Boundary to the remote reservation system.
//!
//! The adapter builds and sends one reservation request and reduces the
//! response to a success flag plus the raw message. It never retries; all
//! retry and backoff decisions belong to this crate.

mod scripted;

use async_trait::async_trait;

use crate::target::{AttemptTarget, RemoteReply};

pub use scripted::{ScriptStep, ScriptedAdapter};

#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    /// Make a single attempt. An `Err` is treated like a failed reply whose
    /// message is the rendered error chain.
    async fn attempt(&self, target: &AttemptTarget) -> anyhow::Result<RemoteReply>;
}
