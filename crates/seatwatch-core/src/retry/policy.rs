use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classification bucket for a failed attempt. Drives the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, resets, refused connections, DNS failures.
    NetworkError,
    /// Bad credentials, expired session or cookie, 401/403.
    AuthenticationError,
    /// The section is full; may free up at any moment.
    ResourceExhausted,
    /// A genuine conflict such as a timetable clash.
    ResourceConflict,
    /// Remote-side failure (5xx, "system busy").
    SystemError,
    /// Nothing matched.
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::NetworkError,
        ErrorKind::AuthenticationError,
        ErrorKind::ResourceExhausted,
        ErrorKind::ResourceConflict,
        ErrorKind::SystemError,
        ErrorKind::Unknown,
    ];

    fn index(self) -> usize {
        match self {
            ErrorKind::NetworkError => 0,
            ErrorKind::AuthenticationError => 1,
            ErrorKind::ResourceExhausted => 2,
            ErrorKind::ResourceConflict => 3,
            ErrorKind::SystemError => 4,
            ErrorKind::Unknown => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "network_error",
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::ResourceConflict => "resource_conflict",
            ErrorKind::SystemError => "system_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry budget of a policy: the number of retries allowed after the first
/// failed attempt, or no limit at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAttempts {
    Limited(u32),
    Unlimited,
}

impl MaxAttempts {
    fn allows(self, attempt: u32) -> bool {
        match self {
            MaxAttempts::Limited(max) => attempt <= max,
            MaxAttempts::Unlimited => true,
        }
    }
}

impl fmt::Display for MaxAttempts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxAttempts::Limited(n) => write!(f, "{}", n),
            MaxAttempts::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Symmetric jitter applied to the exponential delay (±20%).
const JITTER_FRACTION: f64 = 0.2;

/// Exponential backoff with jitter, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: MaxAttempts,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn terminal() -> Self {
        Self {
            max_attempts: MaxAttempts::Limited(0),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 1.0,
        }
    }

    /// `base_delay * exponential_base^(attempt-1)` in seconds, before jitter and cap.
    fn exponential_secs(&self, attempt: u32) -> f64 {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        self.base_delay.as_secs_f64() * self.exponential_base.powi(exp)
    }

    /// Un-jittered delay for `attempt`, capped at `max_delay`.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let secs = self.exponential_secs(attempt);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Whether failed attempt `attempt` may be followed by another one.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.max_attempts.allows(attempt)
    }

    /// Decide whether to retry after failed attempt number `attempt` (1-based).
    pub fn decide_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> RetryDecision {
        if !self.max_attempts.allows(attempt) {
            return RetryDecision::NoRetry;
        }

        let max = self.max_delay.as_secs_f64();
        let secs = self.exponential_secs(attempt);
        // Even the lowest jittered value would hit the cap.
        if !secs.is_finite() || secs * (1.0 - JITTER_FRACTION) >= max {
            return RetryDecision::RetryAfter(self.max_delay);
        }

        let jitter = rng.gen_range(-JITTER_FRACTION..=JITTER_FRACTION) * secs;
        let jittered = (secs + jitter).clamp(0.0, max);
        RetryDecision::RetryAfter(Duration::from_secs_f64(jittered))
    }

    pub fn decide(&self, attempt: u32) -> RetryDecision {
        self.decide_with_rng(attempt, &mut rand::thread_rng())
    }
}

/// Read-only table with one `RetryPolicy` per `ErrorKind`, fixed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    policies: [RetryPolicy; 6],
}

impl Default for PolicyTable {
    fn default() -> Self {
        let mut policies = [RetryPolicy::terminal(); 6];
        policies[ErrorKind::NetworkError.index()] = RetryPolicy {
            max_attempts: MaxAttempts::Limited(3),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
        };
        policies[ErrorKind::ResourceExhausted.index()] = RetryPolicy {
            max_attempts: MaxAttempts::Unlimited,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            exponential_base: 1.5,
        };
        policies[ErrorKind::SystemError.index()] = RetryPolicy {
            max_attempts: MaxAttempts::Limited(5),
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
        };
        policies[ErrorKind::Unknown.index()] = RetryPolicy {
            max_attempts: MaxAttempts::Limited(2),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            exponential_base: 2.0,
        };
        Self { policies }
    }
}

impl PolicyTable {
    pub fn get(&self, kind: ErrorKind) -> &RetryPolicy {
        &self.policies[kind.index()]
    }

    /// Replace the policy for one kind (used while building from config).
    pub fn with_policy(mut self, kind: ErrorKind, policy: RetryPolicy) -> Self {
        self.policies[kind.index()] = policy;
        self
    }

    /// `true` when the first failure of this kind already ends retrying.
    pub fn is_terminal(&self, kind: ErrorKind) -> bool {
        !self.allows_retry(kind, 1)
    }

    pub fn allows_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        self.get(kind).allows_retry(attempt)
    }

    pub fn decide_with_rng<R: Rng + ?Sized>(
        &self,
        kind: ErrorKind,
        attempt: u32,
        rng: &mut R,
    ) -> RetryDecision {
        self.get(kind).decide_with_rng(attempt, rng)
    }

    /// Delay before retrying after failed attempt `attempt` (1-based) of `kind`.
    pub fn decide(&self, kind: ErrorKind, attempt: u32) -> RetryDecision {
        self.get(kind).decide(attempt)
    }
}
