//! `stackward rm`: remove every object belonging to a stack.

use super::report_error;
use colored::Colorize;
use stackward_core::{DockerAdapter, StackNamespace, StackRemover};
use std::sync::Arc;
use std::time::Duration;

pub async fn run(name: &str, timeout: Duration) -> u8 {
    let adapter = match DockerAdapter::from_env() {
        Ok(adapter) => Arc::new(adapter),
        Err(e) => {
            report_error(&e);
            return 1;
        }
    };

    let remover = StackRemover::new(adapter, StackNamespace::new(name), timeout);
    match remover.remove().await {
        Ok(removed) => {
            println!(
                "{} Stack {} removed ({} object(s))",
                "✓".green().bold(),
                name.bold(),
                removed
            );
            0
        }
        Err(e) => {
            report_error(&e);
            1
        }
    }
}
