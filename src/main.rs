//! Wafer Monitor
//!
//! Watches the configured folders until Ctrl-C or a watch subscription fails.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use wafer_monitor::logging::{self, LoggingConfig};
use wafer_monitor::{MonitorConfig, MonitorSession, TracingEventLog};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, env = "WAFER_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Console log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Directory for the event and debug log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Also write the debug log file
    #[arg(short, long)]
    debug: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

impl Args {
    fn logging_config(&self, base: &LoggingConfig) -> LoggingConfig {
        let mut config = base.clone();
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if self.debug {
            config.debug_log = true;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = MonitorConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    logging::initialize_logging(&args.logging_config(&config.logging))?;

    info!("Starting Wafer Monitor v{}", env!("CARGO_PKG_VERSION"));
    config.validate().context("Invalid configuration")?;

    if args.check {
        info!("Configuration is valid");
        return Ok(());
    }

    let mut session = MonitorSession::new(config, Arc::new(TracingEventLog))?;
    session.start().await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_token.cancel();
    });

    session.run_until(shutdown).await?;
    Ok(())
}
