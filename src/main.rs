//! datstat - Distributed statistics over numeric data files
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use datstat::config::{CliArgs, RunConfig};
use datstat::progress::{print_header, print_summary};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.log_directive())?;

    // Validate and create config
    let config = RunConfig::from_args(args).context("Invalid configuration")?;

    if config.show_progress {
        print_header(
            &config.root.display().to_string(),
            config.worker_count,
            &format!("{} ({})", config.collector_addr, config.mode),
        );
    }

    let quiet = config.quiet;
    let report = datstat::run(config).context("Run failed")?;

    info!(
        files = report.files,
        workers = report.workers,
        duration_ms = report.duration.as_millis() as u64,
        "Run completed"
    );

    if !quiet {
        print_summary(&report);
    }

    Ok(())
}

fn setup_logging(default: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout is reserved for result lines
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(())
}
