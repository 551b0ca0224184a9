//! `stackward apply`: deploy a manifest and block until the stack is
//! healthy or rolled back.

use super::report_error;
use colored::Colorize;
use stackward_core::{
    ApplyOptions, ApplyOrchestrator, ApplyOutcome, ComposeParser, ConvertOptions, DockerAdapter,
    StackNamespace,
};
use std::sync::Arc;
use std::time::Duration;

pub struct ApplyArgs {
    pub name: String,
    pub file: String,
    pub timeout: Duration,
    pub rollback_timeout: Duration,
    pub no_wait: bool,
    pub prune: bool,
    pub allow_latest: bool,
    pub parallel: usize,
    pub registry_auth: Option<String>,
}

pub async fn run(args: ApplyArgs) -> u8 {
    let manifest = match ComposeParser::parse_file(&args.file) {
        Ok(manifest) => manifest,
        Err(e) => {
            report_error(&e);
            return 1;
        }
    };

    let adapter = match DockerAdapter::from_env() {
        Ok(adapter) => Arc::new(adapter),
        Err(e) => {
            report_error(&e);
            return 1;
        }
    };

    let mut opts = ApplyOptions::new(ConvertOptions::from_env(args.allow_latest));
    opts.timeout = args.timeout;
    opts.rollback_timeout = args.rollback_timeout;
    opts.no_wait = args.no_wait;
    opts.prune = args.prune;
    opts.parallel = args.parallel;
    opts.registry_auth = args.registry_auth;

    let ns = StackNamespace::new(&args.name);
    let orchestrator = ApplyOrchestrator::new(adapter, ns, opts);

    println!("{} Applying stack {}", "→".cyan().bold(), args.name.bold());

    match orchestrator.apply(&manifest).await {
        ApplyOutcome::Ok => {
            println!("{} Stack {} converged", "✓".green().bold(), args.name.bold());
            0
        }
        ApplyOutcome::DeployError(e) => {
            report_error(&e);
            1
        }
        ApplyOutcome::ConvergenceError(e) => {
            report_error(&e);
            // A convergence timeout with successful rollback is its own
            // exit code; plain convergence failures share the deploy code.
            if e.is_timeout() {
                2
            } else {
                1
            }
        }
        ApplyOutcome::Interrupted => {
            eprintln!("{} Apply interrupted; previous state restored", "✗".red().bold());
            130
        }
    }
}
