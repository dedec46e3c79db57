//! `seatwatch config` – show where the config lives and what is in effect.

use anyhow::Result;
use seatwatch_core::config::{self, SeatwatchConfig};
use seatwatch_core::logging;
use std::path::Path;

pub fn run_config(cfg: &SeatwatchConfig, explicit: Option<&Path>) -> Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config::config_path()?,
    };
    println!("# config: {}", path.display());
    if let Ok(log) = logging::log_path() {
        println!("# log:    {}", log.display());
    }
    print!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}
