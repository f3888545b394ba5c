// Vigil Daemon - Anomaly detection over CSV datasets
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Vigil Daemon
//!
//! Runs the Vigil pipeline over CSV datasets until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a config file
//! vigil-daemon --config vigil.json
//!
//! # Verbose logging
//! vigil-daemon --config vigil.json --log-level debug
//! ```

mod config;
mod csv_engine;

use clap::Parser;
use config::{ConfigError, DaemonConfig};
use csv_engine::CsvEngine;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;
use vigil::{Manager, Mapper, VigilError};

/// Vigil anomaly detection daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Error)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Vigil(#[from] VigilError),

    #[error("Signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Vigil Daemon v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), DaemonError> {
    let config = DaemonConfig::from_file(&args.config)?;
    info!(
        "Loaded {} rules and {} queries from {}",
        config.rules.len(),
        config.queries.len(),
        args.config.display()
    );

    let mapper = Arc::new(Mapper::new());
    for rule in &config.rules {
        mapper.add_rule(rule.clone()).map_err(VigilError::from)?;
    }

    let engine = Arc::new(CsvEngine::new(&config.data_dir, &config.anomaly_log));
    let mut manager = Manager::new(
        mapper,
        engine,
        config.scheduled_queries(),
        config.manager.clone(),
    )?;
    manager.start().await?;
    info!("Anomalies are written to {}", config.anomaly_log.display());

    let signal = tokio::signal::ctrl_c().await;
    info!("Shutting down");
    let stats = manager.stop().await?;
    signal?;

    info!(
        "Executed {} queries ({} failed), processed {} windows, recorded {} anomalies",
        stats.queries_executed,
        stats.query_failures,
        stats.windows_processed,
        stats.anomalies_recorded
    );
    Ok(())
}
