use anyhow::{Context, Result};
use clap::Parser;
use plotmoved::utils::format_bytes;
use plotmoved::{Config, Daemon, TransferMethod};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Moves finished plots from plotter output directories to a farm directory.
#[derive(Parser, Debug)]
#[command(name = "plotmoved", version, about)]
struct Cli {
    /// Source directory to watch (repeatable)
    #[arg(short = 'o', long = "origin")]
    origins: Vec<PathBuf>,

    /// Destination directory
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// Transfer method: 1/rename, 2/move, 3/chunked
    #[arg(short, long)]
    method: Option<TransferMethod>,

    /// Chunk size in bytes for method 3
    #[arg(short = 'b', long = "buffer-size")]
    buffer_size: Option<usize>,

    /// Pause after each chunk in milliseconds (method 3)
    #[arg(short = 't', long = "delay-ms")]
    delay_ms: Option<u64>,

    /// Seconds between scans
    #[arg(long)]
    interval: Option<u64>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scan once and exit
    #[arg(long)]
    once: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Draw a progress bar instead of percentage lines
    #[arg(long)]
    progress_bar: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_addr: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if !self.origins.is_empty() {
            config.sources = self.origins;
        }
        if let Some(destination) = self.destination {
            config.destination = destination;
        }
        if let Some(method) = self.method {
            config.method = method;
        }
        if let Some(buffer_size) = self.buffer_size {
            config.chunk_size = buffer_size;
        }
        if let Some(delay_ms) = self.delay_ms {
            config.chunk_delay_ms = delay_ms;
        }
        if let Some(interval) = self.interval {
            config.scan_interval_secs = interval;
        }
        if self.progress_bar {
            config.progress_bar = true;
        }
        if self.metrics_addr.is_some() {
            config.metrics_bind_addr = self.metrics_addr;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "plotmoved=debug"
    } else {
        "plotmoved=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path).await?,
        None => Config::load().await?,
    };
    let once = cli.once;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let daemon = Daemon::new(config)?;

    let result = if once {
        daemon.scan_once().await.map(|summary| {
            info!(
                "Single pass finished: {} moved ({} resumed), {} failed, {}",
                summary.moved,
                summary.resumed,
                summary.failed,
                format_bytes(summary.bytes_moved)
            );
        })
    } else {
        daemon.run(shutdown_signal()).await
    };

    if let Err(e) = result {
        error!("{}", e);
        error!("Suggested action: {}", e.suggested_action());
        std::process::exit(e.exit_code());
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
