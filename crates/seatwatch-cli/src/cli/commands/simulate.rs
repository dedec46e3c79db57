//! `seatwatch simulate <script.toml>` – run the engine against canned replies.
//!
//! Script format:
//!
//! ```toml
//! latency_ms = 200
//!
//! [[targets]]
//! id = "CS101:01"
//! label = "Intro to CS, section 1"
//! replies = ["fail:Section full", "ok:Enrolled"]
//! ```
//!
//! Replies are `ok:<message>`, `fail:<message>` (the remote system said no)
//! or `error:<message>` (the call itself failed). The last reply repeats.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use seatwatch_core::adapter::{ScriptStep, ScriptedAdapter};
use seatwatch_core::batch::BatchCounts;
use seatwatch_core::config::SeatwatchConfig;
use seatwatch_core::target::{AttemptOutcome, AttemptTarget, TargetId};
use seatwatch_core::Engine;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::SimulateMode;

#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default)]
    latency_ms: u64,
    targets: Vec<ScriptTarget>,
}

#[derive(Debug, Deserialize)]
struct ScriptTarget {
    id: String,
    #[serde(default)]
    label: Option<String>,
    replies: Vec<String>,
}

/// Command-line overrides for the configured batch/selector defaults.
#[derive(Debug, Clone, Copy)]
pub struct SimulateArgs {
    pub mode: SimulateMode,
    pub batch_size: Option<usize>,
    pub delay_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub interval_ms: Option<u64>,
}

fn parse_reply(raw: &str) -> Result<ScriptStep> {
    let (tag, message) = raw
        .split_once(':')
        .with_context(|| format!("reply {raw:?} needs a tag: ok:, fail: or error:"))?;
    let message = message.trim();
    match tag.trim() {
        "ok" => Ok(ScriptStep::ok(message)),
        "fail" => Ok(ScriptStep::fail(message)),
        "error" => Ok(ScriptStep::error(message)),
        other => bail!("unknown reply tag {other:?} in {raw:?}"),
    }
}

fn load_script(data: &str) -> Result<(ScriptedAdapter, Vec<AttemptTarget>)> {
    let script: Script = toml::from_str(data)?;
    if script.targets.is_empty() {
        bail!("script has no targets");
    }

    let mut adapter = ScriptedAdapter::new().with_latency(Duration::from_millis(script.latency_ms));
    let mut targets = Vec::with_capacity(script.targets.len());
    for entry in script.targets {
        let steps = entry
            .replies
            .iter()
            .map(|r| parse_reply(r))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("target {}", entry.id))?;
        if steps.is_empty() {
            bail!("target {} has no replies", entry.id);
        }
        let id = TargetId::new(entry.id);
        adapter = adapter.with_script(id.clone(), steps);
        let label = entry.label.unwrap_or_else(|| id.to_string());
        targets.push(AttemptTarget::new(id, label));
    }
    Ok((adapter, targets))
}

fn describe(outcome: &AttemptOutcome) -> String {
    let kind = outcome
        .kind
        .map(|k| k.to_string())
        .unwrap_or_else(|| "-".to_string());
    let status = if outcome.succeeded { "ok" } else { "failed" };
    format!(
        "{:<7} {:<20} {:>8}  {}",
        status, kind, outcome.attempt, outcome.message
    )
}

pub async fn run_simulate(cfg: &SeatwatchConfig, path: &Path, args: SimulateArgs) -> Result<()> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    let (adapter, targets) = load_script(&data)?;
    let engine = Engine::from_config(cfg, Arc::new(adapter))?;

    match args.mode {
        SimulateMode::Batch => {
            let mut opts = engine.batch_defaults().clone();
            if let Some(n) = args.batch_size {
                opts.batch_size = n;
            }
            if let Some(ms) = args.delay_ms {
                opts.inter_batch_delay = Duration::from_millis(ms);
            }
            let report = engine.run_batch(targets, opts).await?;
            println!("{:<4} {:<16} {:<7} {:<20} {:>8}  MESSAGE", "#", "TARGET", "STATUS", "KIND", "ATTEMPTS");
            for (i, r) in report.reports.iter().enumerate() {
                println!("{:<4} {:<16} {}", i + 1, r.target, describe(&r.outcome));
            }
            let counts = BatchCounts::from(&report);
            println!(
                "total {}, succeeded {}, failed {} ({} chunks, {} pauses)",
                counts.total, counts.succeeded, counts.failed, report.chunks, report.pauses
            );
        }
        SimulateMode::Select => {
            let task = engine.start_selector(targets, args.max_attempts, args.interval_ms)?;
            engine.wait(task).await?;
            let state = engine.selector_status();
            for (id, outcome) in &state.results {
                println!("{:<16} {}", id, describe(outcome));
            }
            match &state.winner {
                Some(id) => println!("{} after {} attempts: {}", state.state, state.attempts, id),
                None => println!("{} after {} attempts", state.state, state.attempts),
            }
        }
    }
    Ok(())
}
