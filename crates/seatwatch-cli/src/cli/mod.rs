//! CLI for the seatwatch reservation engine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use seatwatch_core::config;
use std::path::PathBuf;

use commands::{run_classify, run_config, run_policy, run_simulate, SimulateArgs};

/// Top-level CLI for seatwatch.
#[derive(Debug, Parser)]
#[command(name = "seatwatch")]
#[command(about = "seatwatch: retrying course-section reservation engine", long_about = None)]
pub struct Cli {
    /// Use this config file instead of ~/.config/seatwatch/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

/// How `simulate` drives the scripted targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SimulateMode {
    /// Paced chunks, every target retried on its own.
    Batch,
    /// One attempt at a time across the list until the first success.
    Select,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Classify a failure message (or HTTP status) and show its retry policy.
    Classify {
        /// Raw failure message as returned by the remote system.
        #[arg(required_unless_present = "status")]
        message: Option<String>,

        /// Classify an HTTP status code instead of a message.
        #[arg(long, conflicts_with = "message")]
        status: Option<u16>,
    },

    /// Print the effective backoff policy table.
    Policy,

    /// Show the config file location and effective values.
    Config,

    /// Run the engine against a scripted remote system.
    Simulate {
        /// TOML script describing targets and their replies.
        script: PathBuf,

        #[arg(long, value_enum, default_value = "batch")]
        mode: SimulateMode,

        /// Targets attempted concurrently per chunk (batch mode).
        #[arg(long, value_name = "N")]
        batch_size: Option<usize>,

        /// Pause between chunks in milliseconds (batch mode).
        #[arg(long, value_name = "MS")]
        delay_ms: Option<u64>,

        /// Shared attempt budget (select mode).
        #[arg(long, value_name = "N")]
        max_attempts: Option<u32>,

        /// Fixed pause between attempts in milliseconds (select mode).
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = match &cli.config {
            Some(path) => config::load_from_path(path)?,
            None => config::load_or_init()?,
        };
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Classify { message, status } => {
                run_classify(&cfg, message.as_deref(), status)?
            }
            CliCommand::Policy => run_policy(&cfg)?,
            CliCommand::Config => run_config(&cfg, cli.config.as_deref())?,
            CliCommand::Simulate {
                script,
                mode,
                batch_size,
                delay_ms,
                max_attempts,
                interval_ms,
            } => {
                let args = SimulateArgs {
                    mode,
                    batch_size,
                    delay_ms,
                    max_attempts,
                    interval_ms,
                };
                run_simulate(&cfg, &script, args).await?
            }
        }

        Ok(())
    }
}
