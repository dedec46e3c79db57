use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::BatchOptions;
use crate::retry::{ErrorKind, MaxAttempts, PolicyTable, RetryPolicy};

/// Backoff override for one error kind (optional `[retry.<kind>]` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed after the first failure; omit for no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor per attempt (1.0 = constant delay).
    pub exponential_base: f64,
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self
                .max_attempts
                .map(MaxAttempts::Limited)
                .unwrap_or(MaxAttempts::Unlimited),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            exponential_base: self.exponential_base,
        }
    }
}

/// Per-kind backoff overrides. Kinds left out keep the built-in policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_exhausted: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_conflict: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown: Option<RetryConfig>,
}

impl RetryOverrides {
    fn get(&self, kind: ErrorKind) -> Option<&RetryConfig> {
        match kind {
            ErrorKind::NetworkError => self.network.as_ref(),
            ErrorKind::AuthenticationError => self.authentication.as_ref(),
            ErrorKind::ResourceExhausted => self.resource_exhausted.as_ref(),
            ErrorKind::ResourceConflict => self.resource_conflict.as_ref(),
            ErrorKind::SystemError => self.system.as_ref(),
            ErrorKind::Unknown => self.unknown.as_ref(),
        }
    }
}

/// Chunking and pacing defaults for batch runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
    /// Retry time budget per batch invocation; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget_secs: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            inter_batch_delay_ms: 1000,
            time_budget_secs: None,
        }
    }
}

/// Defaults for persistent selector jobs started without explicit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 200,
            interval_ms: 3000,
        }
    }
}

/// Global configuration loaded from `~/.config/seatwatch/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatwatchConfig {
    /// Initial number of task slots.
    pub max_concurrency: usize,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub retry: RetryOverrides,
}

impl Default for SeatwatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            batch: BatchConfig::default(),
            selector: SelectorConfig::default(),
            retry: RetryOverrides::default(),
        }
    }
}

impl SeatwatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            bail!("max_concurrency must be at least 1");
        }
        if self.batch.batch_size == 0 {
            bail!("batch.batch_size must be at least 1");
        }
        if self.batch.inter_batch_delay_ms == 0 {
            bail!("batch.inter_batch_delay_ms must be positive");
        }
        if self.selector.max_attempts == 0 {
            bail!("selector.max_attempts must be at least 1");
        }
        if self.selector.interval_ms == 0 {
            bail!("selector.interval_ms must be positive");
        }
        for kind in ErrorKind::ALL {
            if let Some(retry) = self.retry.get(kind) {
                if !retry.exponential_base.is_finite() || retry.exponential_base <= 0.0 {
                    bail!("retry override for {}: exponential_base must be positive", kind);
                }
            }
        }
        Ok(())
    }

    /// Built-in policies with this file's overrides applied.
    pub fn policy_table(&self) -> PolicyTable {
        ErrorKind::ALL
            .into_iter()
            .fold(PolicyTable::default(), |table, kind| match self.retry.get(kind) {
                Some(retry) => table.with_policy(kind, retry.to_policy()),
                None => table,
            })
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            batch_size: self.batch.batch_size,
            inter_batch_delay: Duration::from_millis(self.batch.inter_batch_delay_ms),
            time_budget: self.batch.time_budget_secs.map(Duration::from_secs),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("seatwatch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<SeatwatchConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = SeatwatchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    load_from_path(&path)
}

/// Load and validate configuration from an explicit file.
pub fn load_from_path(path: &Path) -> Result<SeatwatchConfig> {
    let data = fs::read_to_string(path)?;
    let cfg: SeatwatchConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}
