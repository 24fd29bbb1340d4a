//! Configuration types for datstat
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation

use crate::error::ConfigError;
use crate::walker::FileFilter;
use clap::{Parser, ValueEnum};
use regex::Regex;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

/// Maximum reasonable worker count
pub const MAX_WORKERS: usize = 512;

/// Default collector port
pub const DEFAULT_PORT: u16 = 19052;

/// Distributed statistics over numeric data files
#[derive(Parser, Debug, Clone)]
#[command(
    name = "datstat",
    version,
    about = "Summarize numeric data files with a worker pool and a collector",
    long_about = "Walks DIRECTORY for data files and summarizes each one (count, mean, standard \
                  deviation) on a pool of worker threads.\n\n\
                  Results are sent over TCP to a single collector, which prints one line per \
                  file to stdout. Logs, progress and the run summary go to stderr.",
    after_help = "EXAMPLES:\n    \
        datstat ./data\n    \
        datstat ./data 8 -p\n    \
        datstat ./data --extension csv --exclude 'archive'\n    \
        datstat ./data 4 --mode thread --port 0"
)]
pub struct CliArgs {
    /// Directory to scan recursively
    #[arg(value_name = "DIRECTORY")]
    pub directory: PathBuf,

    /// Number of worker threads
    #[arg(value_name = "WORKERS", default_value_t = default_workers())]
    pub workers: usize,

    /// Collector host
    #[arg(long, default_value = "127.0.0.1", env = "DATSTAT_HOST")]
    pub host: String,

    /// Collector port (0 picks a free port, thread mode only)
    #[arg(long, default_value_t = DEFAULT_PORT, env = "DATSTAT_PORT")]
    pub port: u16,

    /// Extension of the data files, without the dot
    #[arg(long, default_value = "dat", value_name = "EXT")]
    pub extension: String,

    /// Exclude paths matching pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Where the collector runs
    #[arg(long, value_enum, default_value_t = LaunchMode::Process)]
    pub mode: LaunchMode,

    /// Show a progress spinner on stderr
    #[arg(short = 'p', long)]
    pub progress: bool,

    /// Quiet mode - suppress the run summary
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Default tracing directive when RUST_LOG is unset
    pub fn log_directive(&self) -> &'static str {
        if self.verbose {
            "datstat=debug,warn"
        } else {
            "datstat=info,warn"
        }
    }
}

/// How the collector is launched relative to the coordinator
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Forked child process, readiness via SIGUSR1
    Process,
    /// Thread in this process, readiness via channel
    Thread,
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchMode::Process => f.write_str("process"),
            LaunchMode::Thread => f.write_str("thread"),
        }
    }
}

fn default_workers() -> usize {
    // Summarizing is CPU bound, one worker per core
    num_cpus::get().clamp(1, MAX_WORKERS)
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root of the traversal
    pub root: PathBuf,

    /// Number of workers (W)
    pub worker_count: usize,

    /// Collector listening address
    pub collector_addr: SocketAddr,

    /// Data file extension
    pub extension: String,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// Collector launch mode
    pub mode: LaunchMode,

    /// Show the spinner
    pub show_progress: bool,

    /// Suppress the summary
    pub quiet: bool,
}

impl RunConfig {
    /// Create validated config from CLI args
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            });
        }

        let metadata =
            std::fs::metadata(&args.directory).map_err(|e| ConfigError::InvalidDirectory {
                path: args.directory.clone(),
                reason: e.to_string(),
            })?;
        if !metadata.is_dir() {
            return Err(ConfigError::InvalidDirectory {
                path: args.directory,
                reason: "Not a directory".to_string(),
            });
        }

        validate_extension(&args.extension)?;

        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let collector_addr = resolve_collector(&args.host, args.port)?;
        if collector_addr.port() == 0 && args.mode == LaunchMode::Process {
            return Err(ConfigError::InvalidAddress {
                addr: collector_addr.to_string(),
                reason: "port 0 needs --mode thread, a forked collector cannot report its port"
                    .to_string(),
            });
        }

        Ok(Self {
            root: args.directory,
            worker_count: args.workers,
            collector_addr,
            extension: args.extension,
            exclude_patterns,
            mode: args.mode,
            show_progress: args.progress && !args.quiet,
            quiet: args.quiet,
        })
    }

    /// Discovery filter for this run
    pub fn filter(&self) -> FileFilter {
        FileFilter::new(self.extension.clone(), self.exclude_patterns.clone())
    }
}

fn validate_extension(extension: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidExtension {
        extension: extension.to_string(),
        reason: reason.to_string(),
    };

    if extension.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if extension.starts_with('.') {
        return Err(invalid("give the extension without the leading dot"));
    }
    if extension.contains(['/', '\\']) {
        return Err(invalid("must not contain path separators"));
    }
    Ok(())
}

fn resolve_collector(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidAddress {
        addr: format!("{host}:{port}"),
        reason,
    };

    (host, port)
        .to_socket_addrs()
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid("host resolved to no addresses".to_string()))
}
