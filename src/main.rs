//! # media-isolation
//!
//! Runs media scans and encodes in an isolated worker process, so a crash or
//! hang in the codec library cannot take the host down with it.
//!
//! ## Usage
//!
//! ```bash
//! # Scan a source for titles
//! media-isolation scan /path/to/movie.mkv
//!
//! # Encode from a codec job document
//! media-isolation encode job.json
//!
//! # Print the worker's version
//! media-isolation version
//! ```
//!
//! The worker executable and polling policy are configured through environment
//! variables such as `WORKER_PATH`, `WORKER_PORT` and `PROCESS_ISOLATION`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_isolation::commands::{
    encode::EncodeCommand, scan::ScanCommand, version::VersionCommand,
};

/// media-isolation - run media scans and encodes in an isolated worker
#[derive(Parser)]
#[command(
    name = "media-isolation",
    about = "Run media scans and encodes in an isolated worker process",
    long_about = "Launches a supervised worker process per job and drives it over an authenticated local HTTP channel.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Scan a source and list its titles
    Scan {
        /// File or disc folder to scan
        path: PathBuf,
        /// Scan only this title (0 scans all)
        #[arg(long, short = 't', default_value_t = 0)]
        title: u32,
        /// Number of preview frames to generate per title
        #[arg(long, default_value_t = 10)]
        previews: u32,
        /// Ignore titles shorter than this many seconds
        #[arg(long, default_value_t = 10)]
        min_duration: u64,
        /// Disable hardware acceleration
        #[arg(long)]
        no_hardware: bool,
    },
    /// Encode using a codec job document
    Encode {
        /// JSON job document with Source.Path and Destination.File
        job: PathBuf,
        /// Disable hardware acceleration
        #[arg(long)]
        no_hardware: bool,
    },
    /// Launch a worker and print its version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_isolation=info,worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Scan {
            path,
            title,
            previews,
            min_duration,
            no_hardware,
        } => {
            info!(
                "Starting scan command for path: {:?}, title: {}, previews: {}",
                path, title, previews
            );
            ScanCommand::new(
                path,
                title,
                previews,
                Duration::from_secs(min_duration),
                no_hardware,
            )
            .execute()
            .await
        }
        Commands::Encode { job, no_hardware } => {
            info!("Starting encode command for job: {:?}", job);
            EncodeCommand::new(job, no_hardware).execute().await
        }
        Commands::Version => VersionCommand::new().execute().await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
