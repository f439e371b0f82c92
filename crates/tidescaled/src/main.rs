//! tidescaled — the Tidescale daemon.
//!
//! Single binary that assembles the autoscaling control loop:
//! - Config loader (`tidescale.toml`)
//! - Credential cache
//! - Scaler registry (built-in trigger types)
//! - Scale handler (one polling task per target)
//! - External metrics API + Prometheus exposition
//!
//! # Usage
//!
//! ```text
//! tidescaled run --config /etc/tidescale/tidescale.toml --listen 0.0.0.0:6443
//! tidescaled validate --config tidescale.toml
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,tidescaled=debug,tidescale=debug";

#[derive(Parser)]
#[command(name = "tidescaled", about = "Tidescale autoscaling daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Load the config, register every target and serve the metrics API.
    Run {
        /// Path to tidescale.toml.
        #[arg(long, default_value = "tidescale.toml")]
        config: PathBuf,

        /// Listen address; overrides `server.listen`.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Parse and validate a config file, then exit.
    Validate {
        #[arg(long, default_value = "tidescale.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config, listen } => daemon::run(&config, listen).await,
        Command::Validate { config } => daemon::validate(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}
