use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::time::Duration;

mod commands;

#[derive(Parser)]
#[command(name = "stackward")]
#[command(about = "Synchronous, self-healing stack deploys", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a manifest and wait for the stack to converge
    Apply {
        /// Stack namespace
        #[arg(short = 'n', long = "name")]
        name: String,

        /// Manifest path
        #[arg(short = 'f', long = "file")]
        file: String,

        /// Whole-apply budget
        #[arg(long, default_value = "15m", value_parser = humantime::parse_duration)]
        timeout: Duration,

        /// Rollback budget
        #[arg(long, default_value = "10m", value_parser = humantime::parse_duration)]
        rollback_timeout: Duration,

        /// Return immediately after deploy, skipping convergence
        #[arg(long)]
        no_wait: bool,

        /// Delete orphaned resources
        #[arg(long)]
        prune: bool,

        /// Permit image references with a ':latest' (or missing) tag
        #[arg(long)]
        allow_latest: bool,

        /// Max concurrent service updates
        #[arg(long, default_value = "1")]
        parallel: usize,

        /// Encoded registry auth token for pulls and service writes
        #[arg(long)]
        registry_auth: Option<String>,
    },

    /// Show the diff between the cluster and a manifest, without mutating
    Plan {
        /// Stack namespace
        #[arg(short = 'n', long = "name")]
        name: String,

        /// Manifest path
        #[arg(short = 'f', long = "file")]
        file: String,

        /// Permit image references with a ':latest' (or missing) tag
        #[arg(long)]
        allow_latest: bool,
    },

    /// Remove an entire stack
    Rm {
        /// Stack namespace
        #[arg(short = 'n', long = "name")]
        name: String,

        /// How long to wait for each service to disappear
        #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
        timeout: Duration,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Apply {
            name,
            file,
            timeout,
            rollback_timeout,
            no_wait,
            prune,
            allow_latest,
            parallel,
            registry_auth,
        } => {
            commands::apply::run(commands::apply::ApplyArgs {
                name,
                file,
                timeout,
                rollback_timeout,
                no_wait,
                prune,
                allow_latest,
                parallel,
                registry_auth,
            })
            .await
        }

        Commands::Plan { name, file, allow_latest } => {
            commands::plan::run(&name, &file, allow_latest).await
        }

        Commands::Rm { name, timeout } => commands::rm::run(&name, timeout).await,
    };

    ExitCode::from(code)
}
