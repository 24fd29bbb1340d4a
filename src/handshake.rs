//! Collector bootstrap: readiness notification and worker-count handoff
//!
//! The collector must be listening before any worker connects, and it must
//! know how many workers to wait for before it can decide the run is over.
//! Bootstrapping happens in two steps:
//!
//! 1. The collector binds its endpoint and fires a one-shot readiness
//!    notification at the coordinator.
//! 2. The coordinator opens a throwaway connection and writes the worker
//!    count; the collector reads it from its first accepted connection.
//!
//! Readiness is delivered either as `SIGUSR1` to the parent process (the
//! collector runs in a forked child) or through a single-slot channel (the
//! collector runs on a thread and reports the address it actually bound).

use crate::error::{HandshakeError, TransportError};
use crate::protocol::{decode_worker_count, encode_worker_count};
use crossbeam_channel::{bounded, Receiver, Sender};
use nix::errno::Errno;
use nix::sys::signal::{kill, SigSet, Signal};
use nix::unistd::{getppid, Pid};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use tracing::debug;

/// Collector side of the readiness notification
pub trait ReadyNotifier {
    /// Announce that the collector listens on `addr`
    fn notify(self, addr: SocketAddr) -> Result<(), HandshakeError>;
}

/// Coordinator side of the readiness notification
pub trait ReadyWaiter {
    /// Block until the collector is ready; returns the address to connect to
    fn wait(self) -> Result<SocketAddr, HandshakeError>;
}

/// Signal-based waiter for a collector running in a child process
///
/// Construct it before forking: `SIGUSR1` and `SIGCHLD` are blocked on the
/// calling thread so that a notification sent early stays pending until
/// [`ReadyWaiter::wait`] consumes it. Threads spawned afterwards inherit
/// the mask, so the signal cannot interrupt anything else in the run.
pub struct SignalWaiter {
    mask: SigSet,
    addr: SocketAddr,
}

impl SignalWaiter {
    /// Block the readiness signals and remember where the collector will listen
    pub fn install(addr: SocketAddr) -> Result<Self, HandshakeError> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGUSR1);
        mask.add(Signal::SIGCHLD);
        mask.thread_block().map_err(HandshakeError::Signal)?;
        Ok(Self { mask, addr })
    }
}

impl ReadyWaiter for SignalWaiter {
    fn wait(self) -> Result<SocketAddr, HandshakeError> {
        loop {
            match self.mask.wait() {
                Ok(Signal::SIGUSR1) => {
                    debug!(addr = %self.addr, "Collector signalled readiness");
                    return Ok(self.addr);
                }
                Ok(Signal::SIGCHLD) => return Err(HandshakeError::CollectorExited),
                Ok(other) => debug!(signal = ?other, "Ignoring unexpected signal"),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(HandshakeError::Signal(e)),
            }
        }
    }
}

/// Signal-based notifier used by the forked collector
pub struct SignalNotifier {
    coordinator: Pid,
}

impl SignalNotifier {
    /// Notify the parent process
    pub fn parent() -> Self {
        Self {
            coordinator: getppid(),
        }
    }
}

impl ReadyNotifier for SignalNotifier {
    fn notify(self, addr: SocketAddr) -> Result<(), HandshakeError> {
        debug!(%addr, pid = %self.coordinator, "Signalling coordinator");
        kill(self.coordinator, Signal::SIGUSR1)
            .map_err(|e| HandshakeError::Notify(e.to_string()))
    }
}

/// Channel-based notifier for a collector running on a thread
pub struct ChannelNotifier {
    tx: Sender<SocketAddr>,
}

/// Channel-based waiter paired with [`ChannelNotifier`]
pub struct ChannelWaiter {
    rx: Receiver<SocketAddr>,
}

/// Create a connected notifier/waiter pair
pub fn channel_readiness() -> (ChannelNotifier, ChannelWaiter) {
    let (tx, rx) = bounded(1);
    (ChannelNotifier { tx }, ChannelWaiter { rx })
}

impl ReadyNotifier for ChannelNotifier {
    fn notify(self, addr: SocketAddr) -> Result<(), HandshakeError> {
        self.tx
            .send(addr)
            .map_err(|_| HandshakeError::Notify("coordinator is gone".into()))
    }
}

impl ReadyWaiter for ChannelWaiter {
    fn wait(self) -> Result<SocketAddr, HandshakeError> {
        // Disconnected means the collector dropped its notifier unused
        self.rx.recv().map_err(|_| HandshakeError::CollectorExited)
    }
}

/// Coordinator: hand the worker count to the collector over a throwaway connection
pub fn send_worker_count(addr: SocketAddr, workers: u32) -> Result<(), HandshakeError> {
    let mut stream = TcpStream::connect(addr)
        .map_err(|source| HandshakeError::Handoff(TransportError::Connect { addr, source }))?;
    stream
        .write_all(&encode_worker_count(workers))
        .map_err(|e| HandshakeError::Handoff(TransportError::Send(e)))?;
    // Best effort: the collector closes its end after reading
    let _ = stream.shutdown(Shutdown::Both);
    debug!(%addr, workers, "Worker count handed off");
    Ok(())
}

/// Collector: accept the handoff connection and read the worker count
pub fn receive_worker_count(listener: &TcpListener) -> Result<u32, HandshakeError> {
    let (mut stream, peer) = listener
        .accept()
        .map_err(|e| HandshakeError::Receive(TransportError::Receive(e)))?;

    let mut bytes = [0u8; 4];
    stream.read_exact(&mut bytes).map_err(|e| {
        HandshakeError::Receive(if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::Receive(e)
        })
    })?;
    drop(stream);

    let workers = decode_worker_count(bytes);
    if workers == 0 {
        return Err(HandshakeError::InvalidWorkerCount(workers));
    }
    debug!(%peer, workers, "Worker count received");
    Ok(workers)
}
