//! CLI command handlers, one file per command.

mod classify;
mod config;
mod policy;
mod simulate;

pub use classify::run_classify;
pub use config::run_config;
pub use policy::run_policy;
pub use simulate::{run_simulate, SimulateArgs};
