//! devgrid: run a local Consul + Nomad cluster with the traefik, bindle and
//! hippo jobs deployed on it.
//!
//! # Usage
//!
//! ```text
//! devgrid init --path ~/fermyon-installer/local
//! devgrid check
//! devgrid up
//! devgrid status hippo --format json
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "devgrid",
    about = "devgrid: local Consul + Nomad development cluster",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agents, deploy every job and keep the cluster up until Ctrl-C.
    Up {
        /// Config file (default: ./devgrid.toml if present, else built-in defaults)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Leave the agents running when a deployment fails.
        #[arg(long)]
        keep_on_failure: bool,
    },
    /// Check that the agent binaries are installed.
    Check {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write a devgrid.toml scaffold.
    Init {
        /// Installer directory (holds etc/ and job/)
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
        /// Overwrite an existing devgrid.toml.
        #[arg(long)]
        force: bool,
    },
    /// Show a job's deployment status as the scheduler reports it.
    Status {
        /// Job name, e.g. hippo
        job: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,devgrid=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Up {
            config,
            keep_on_failure,
        } => commands::up::up(config.as_deref(), keep_on_failure).await,
        Commands::Check { config } => commands::check::check(config.as_deref()).await,
        Commands::Init { path, force } => commands::init::init(&path, force),
        Commands::Status {
            job,
            config,
            format,
        } => commands::status::status(&job, config.as_deref(), &format).await,
    }
}
