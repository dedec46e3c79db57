//! `seatwatch classify` – classify a failure and show how it would be retried.

use anyhow::Result;
use seatwatch_core::config::SeatwatchConfig;
use seatwatch_core::retry::{Classifier, ErrorKind, PolicyTable};

use super::policy::describe;

pub fn run_classify(cfg: &SeatwatchConfig, message: Option<&str>, status: Option<u16>) -> Result<()> {
    let classifier = Classifier::builtin();
    let kind = match (status, message) {
        (Some(code), _) => classifier.classify_status(code),
        (None, Some(message)) => classifier.classify(message),
        (None, None) => anyhow::bail!("give a message or --status <code>"),
    };
    println!("{}", render(kind, &cfg.policy_table()));
    Ok(())
}

fn render(kind: ErrorKind, table: &PolicyTable) -> String {
    if table.is_terminal(kind) {
        format!("{kind}: not retried")
    } else {
        format!("{kind}: {}", describe(table.get(kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_retried_kinds_render_differently() {
        let table = PolicyTable::default();
        assert_eq!(
            render(ErrorKind::ResourceConflict, &table),
            "resource_conflict: not retried"
        );
        let exhausted = render(ErrorKind::ResourceExhausted, &table);
        assert!(exhausted.starts_with("resource_exhausted: unlimited retries"));
    }
}
