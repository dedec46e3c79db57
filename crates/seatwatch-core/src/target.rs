//! Reservation targets and the outcomes produced by attempting them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::retry::ErrorKind;

/// Opaque identity of one reservation target.
///
/// Built from the section and offering identifiers; callers should treat the
/// string form as an opaque key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Compose an id from a section id and the offering it belongs to.
    pub fn from_parts(section_id: &str, offering_id: &str) -> Self {
        Self(format!("{}:{}", offering_id, section_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One resource to reserve. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptTarget {
    pub id: TargetId,
    /// Human-readable label (e.g. course title and section number).
    pub label: String,
    /// Passed through to the remote adapter unchanged.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl AttemptTarget {
    pub fn new(id: TargetId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Key under which concurrent attempts on this target are collapsed.
    ///
    /// `serde_json::Map` keeps keys sorted, so the rendered parameters are
    /// canonical regardless of insertion order.
    pub fn dedupe_key(&self) -> String {
        let params = serde_json::Value::Object(self.params.clone());
        format!("attempt:{}?{}", self.id, params)
    }
}

/// What the remote adapter reported for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteReply {
    pub succeeded: bool,
    pub raw_message: String,
}

impl RemoteReply {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            raw_message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            raw_message: message.into(),
        }
    }
}

/// Result of one attempt. Appended to a target's history, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub succeeded: bool,
    /// Classified failure kind; `None` on success or when no attempt was made.
    pub kind: Option<ErrorKind>,
    pub message: String,
    /// 1-based attempt number; 0 when the target was never attempted.
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

impl AttemptOutcome {
    pub fn success(attempt: u32, message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            kind: None,
            message: message.into(),
            attempt,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(attempt: u32, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            kind: Some(kind),
            message: message.into(),
            attempt,
            timestamp: Utc::now(),
        }
    }

    /// Outcome recorded for a target that was stopped before its first attempt.
    pub fn not_attempted(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            kind: None,
            message: message.into(),
            attempt: 0,
            timestamp: Utc::now(),
        }
    }
}
