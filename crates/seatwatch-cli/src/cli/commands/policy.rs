//! `seatwatch policy` – print the effective backoff table.

use anyhow::Result;
use seatwatch_core::config::SeatwatchConfig;
use seatwatch_core::retry::{ErrorKind, MaxAttempts, RetryPolicy};

/// One-line summary of a policy's retry budget and delays.
pub(super) fn describe(policy: &RetryPolicy) -> String {
    let budget = match policy.max_attempts {
        MaxAttempts::Unlimited => "unlimited retries".to_string(),
        MaxAttempts::Limited(0) => return "never retried".to_string(),
        MaxAttempts::Limited(n) => format!("up to {n} retries"),
    };
    format!(
        "{budget}, base {}ms x{} per attempt, capped at {}ms (±20% jitter)",
        policy.base_delay.as_millis(),
        policy.exponential_base,
        policy.max_delay.as_millis()
    )
}

pub fn run_policy(cfg: &SeatwatchConfig) -> Result<()> {
    let table = cfg.policy_table();
    println!(
        "{:<22} {:>10} {:>10} {:>10} {:>6}",
        "KIND", "RETRIES", "BASE(ms)", "CAP(ms)", "x"
    );
    for kind in ErrorKind::ALL {
        let policy = table.get(kind);
        println!(
            "{:<22} {:>10} {:>10} {:>10} {:>6}",
            kind.as_str(),
            policy.max_attempts.to_string(),
            policy.base_delay.as_millis(),
            policy.max_delay.as_millis(),
            policy.exponential_base
        );
    }
    Ok(())
}
