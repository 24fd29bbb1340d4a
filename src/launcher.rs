//! Launching the collector next to the coordinator
//!
//! Two launch modes share the same coordinator, collector and wire protocol:
//!
//! - **Process**: the collector runs in a forked child. The child binds,
//!   sends `SIGUSR1` to the parent and serves until every worker has
//!   terminated; the parent reaps it once its own workers are joined.
//! - **Thread**: the collector runs on a thread of this process and
//!   reports the address it bound through a channel, so port 0 works.

use crate::collector::{Collector, CollectorSummary};
use crate::config::{LaunchMode, RunConfig};
use crate::error::{display_chain, CollectorError, HandshakeError, Result, StatError};
use crate::handshake::{channel_readiness, SignalNotifier, SignalWaiter};
use crate::progress::ProgressReporter;
use crate::walker::{Coordinator, CoordinatorReport};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Files discovered and processed
    pub files: u64,

    /// Numbers read across all files
    pub values: u64,

    /// Worker pool size
    pub workers: usize,

    /// Lines the collector emitted, when it ran in this process
    pub records: Option<u64>,

    /// Wall time of the run
    pub duration: Duration,

    /// Where the collector ran
    pub mode: LaunchMode,
}

impl RunReport {
    fn new(
        report: CoordinatorReport,
        records: Option<u64>,
        started: Instant,
        mode: LaunchMode,
    ) -> Self {
        Self {
            files: report.files_processed,
            values: report.values_read,
            workers: report.workers,
            records,
            duration: started.elapsed(),
            mode,
        }
    }
}

fn coordinator(config: &Arc<RunConfig>) -> Coordinator {
    let coordinator = Coordinator::new(Arc::clone(config));
    if config.show_progress {
        coordinator.with_progress(ProgressReporter::new())
    } else {
        coordinator
    }
}

/// Run with the collector in a forked child process writing to stdout
///
/// Must be called while the calling thread is the only one in the process.
pub(crate) fn run_forked(config: Arc<RunConfig>) -> Result<RunReport> {
    let started = Instant::now();

    // Must precede the fork so an early SIGUSR1 stays pending
    let waiter = SignalWaiter::install(config.collector_addr)?;

    // SAFETY: no other thread exists yet in this process; the child only
    // binds a socket, serves and exits without returning into main.
    match unsafe { fork() }.map_err(CollectorError::Fork)? {
        ForkResult::Child => {
            let code = match serve_child(config.collector_addr) {
                Ok(summary) => {
                    debug!(records = summary.records, "Collector process exiting");
                    0
                }
                Err(e) => {
                    let message = display_chain(&e);
                    error!(error = %message, "Collector process failed");
                    eprintln!("Error: {message}");
                    1
                }
            };
            std::process::exit(code);
        }
        ForkResult::Parent { child } => {
            debug!(pid = %child, "Collector process forked");

            match coordinator(&config).run(waiter) {
                Ok(report) => {
                    reap(child)?;
                    Ok(RunReport::new(report, None, started, LaunchMode::Process))
                }
                Err(e) => {
                    // The collector would wait forever for missing terminations
                    if let Err(kill_err) = kill(child, Signal::SIGTERM) {
                        debug!(pid = %child, error = %kill_err, "Collector already gone");
                    }
                    if let Err(reap_err) = reap(child) {
                        debug!(error = %reap_err, "Collector stopped");
                    }
                    Err(e)
                }
            }
        }
    }
}

fn serve_child(addr: SocketAddr) -> std::result::Result<CollectorSummary, CollectorError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let summary = Collector::bind(addr)?.serve(SignalNotifier::parent(), &mut out)?;
    out.flush().map_err(CollectorError::Output)?;
    Ok(summary)
}

/// Wait for the collector process and check how it ended
fn reap(child: Pid) -> std::result::Result<(), CollectorError> {
    let status = loop {
        match waitpid(child, None) {
            Ok(status) => break status,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(CollectorError::Terminated(format!("waitpid failed: {e}"))),
        }
    };

    match status {
        WaitStatus::Exited(_, 0) => {
            debug!(pid = %child, "Collector process exited cleanly");
            Ok(())
        }
        WaitStatus::Exited(_, code) => {
            Err(CollectorError::Terminated(format!("exit status {code}")))
        }
        WaitStatus::Signaled(_, signal, _) => {
            Err(CollectorError::Terminated(format!("killed by {signal:?}")))
        }
        other => Err(CollectorError::Terminated(format!("{other:?}"))),
    }
}

type CollectorThread<W> = JoinHandle<std::result::Result<(CollectorSummary, W), CollectorError>>;

/// Run with the collector on a thread of this process
///
/// Results are written to `out`, which is handed back with the report.
/// If the coordinator fails, the collector thread is left behind: it keeps
/// waiting for terminations that will never come, and ends with the process.
pub fn run_threaded<W>(config: Arc<RunConfig>, out: W) -> Result<(RunReport, W)>
where
    W: Write + Send + 'static,
{
    let started = Instant::now();
    let (notifier, waiter) = channel_readiness();
    let addr = config.collector_addr;

    let collector: CollectorThread<W> = thread::Builder::new()
        .name("collector".to_string())
        .spawn(move || {
            let mut out = out;
            let summary = Collector::bind(addr)?.serve(notifier, &mut out)?;
            Ok((summary, out))
        })?;

    let report = match coordinator(&config).run(waiter) {
        Ok(report) => report,
        Err(StatError::Handshake(HandshakeError::CollectorExited)) => {
            // The thread gave up before announcing readiness; report why
            join_collector(collector)?;
            let reason = "collector stopped before it was ready".to_string();
            return Err(CollectorError::Terminated(reason).into());
        }
        Err(e) => {
            warn!("Leaving collector thread behind after failure");
            return Err(e);
        }
    };

    let (summary, out) = join_collector(collector)?;
    if summary.records != report.files_processed {
        warn!(
            records = summary.records,
            files = report.files_processed,
            "Collector and workers disagree on the number of results"
        );
    }
    info!(records = summary.records, "Collector thread finished");

    Ok((
        RunReport::new(report, Some(summary.records), started, LaunchMode::Thread),
        out,
    ))
}

fn join_collector<W>(handle: CollectorThread<W>) -> Result<(CollectorSummary, W)> {
    handle
        .join()
        .map_err(|_| CollectorError::Terminated("collector thread panicked".into()))?
        .map_err(StatError::from)
}

/// Run in the configured mode, printing results to stdout
///
/// [`LaunchMode::Process`] forks, so the caller must not have started any
/// other thread yet. The `datstat` binary calls it from `main` before any
/// thread is spawned. Embedders that already run threads should use
/// [`run_threaded`].
pub fn run(config: RunConfig) -> Result<RunReport> {
    let config = Arc::new(config);
    match config.mode {
        LaunchMode::Process => run_forked(config),
        LaunchMode::Thread => run_threaded(config, io::stdout()).map(|(report, _)| report),
    }
}
