//! Error types for datstat
//!
//! This module defines the error hierarchy for one run:
//! - Configuration and CLI errors
//! - Coordinator traversal errors
//! - Per-file analysis errors
//! - Wire protocol and transport errors
//! - Handshake, worker and collector errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Every message names the role that failed (Coordinator, Worker N, Collector)
//! - A message never repeats its source; render the whole chain with `display_chain`
//! - Nothing here is recoverable; callers propagate and the run ends

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for a datstat run
#[derive(Error, Debug)]
pub enum StatError {
    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Directory traversal errors
    #[error(transparent)]
    Walk(#[from] WalkError),

    /// Handshake errors
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Worker errors
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Collector errors
    #[error(transparent)]
    Collector(#[from] CollectorError),

    /// I/O errors outside any of the roles above
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Root directory missing or not a directory
    #[error("Invalid directory '{path}': {reason}")]
    InvalidDirectory { path: PathBuf, reason: String },

    /// Extension unusable for matching file names
    #[error("Invalid extension '{extension}': {reason}")]
    InvalidExtension { extension: String, reason: String },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    /// Collector address cannot be used in the selected mode
    #[error("Invalid collector address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },
}

/// Coordinator traversal errors
#[derive(Error, Debug)]
pub enum WalkError {
    /// A directory could not be opened or read
    #[error("Coordinator: failed to read directory '{path}': {reason}")]
    ReadDirFailed { path: PathBuf, reason: String },
}

/// Errors while summarizing a single data file
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The file could not be opened
    #[error("failed to open file '{path}'")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading stopped before end of input
    #[error("failed to read data from '{path}'")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A token that is not a finite number was found before end of input
    #[error("failed to read data from '{path}': '{token}' is not a number")]
    Malformed { path: PathBuf, token: String },
}

/// Framing errors on the worker/collector connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame tag is neither result nor termination
    #[error("unknown frame tag 0x{0:02x}")]
    UnknownTag(u8),

    /// Declared payload length exceeds the frame limit
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    /// Payload is not UTF-8 text
    #[error("frame payload is not valid UTF-8")]
    InvalidUtf8,

    /// Result payload does not have the four tab-separated fields
    #[error("malformed result record '{0}'")]
    InvalidRecord(String),

    /// Termination frame with an unexpected payload
    #[error("malformed termination frame")]
    InvalidTermination,

    /// Reply other than the acknowledgment token
    #[error("unexpected acknowledgment {0:?}")]
    BadAck(Vec<u8>),
}

/// Transport errors on a single connection
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not connect to the collector
    #[error("failed to connect to {addr}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Write failed
    #[error("failed to send")]
    Send(#[source] std::io::Error),

    /// Read failed
    #[error("failed to receive")]
    Receive(#[source] std::io::Error),

    /// Peer closed the connection mid-conversation
    #[error("connection closed by peer")]
    Closed,

    /// Peer sent something the protocol does not allow
    #[error("protocol violation")]
    Protocol(#[from] ProtocolError),
}

/// Readiness and configuration handoff errors
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// Signal mask or wait failed
    #[error("Coordinator: readiness signal failed")]
    Signal(#[source] nix::Error),

    /// Readiness notification could not be delivered
    #[error("Collector: failed to notify coordinator: {0}")]
    Notify(String),

    /// Collector went away before signalling readiness
    #[error("Coordinator: collector exited before becoming ready")]
    CollectorExited,

    /// Sending W to the collector failed
    #[error("Coordinator: failed to hand off worker count")]
    Handoff(#[source] TransportError),

    /// Receiving W from the coordinator failed
    #[error("Collector: failed to read worker count")]
    Receive(#[source] TransportError),

    /// Worker count on the wire is unusable
    #[error("Collector: received invalid worker count {0}")]
    InvalidWorkerCount(u32),
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker thread could not be started
    #[error("Failed to spawn worker {id}: {reason}")]
    SpawnFailed { id: usize, reason: String },

    /// Worker panicked
    #[error("Worker {id} panicked")]
    Panicked { id: usize },

    /// Data file could not be summarized
    #[error("Worker {id}: failed to summarize file")]
    Analysis {
        id: usize,
        #[source]
        source: AnalysisError,
    },

    /// Connection to the collector failed
    #[error("Worker {id}: collector connection failed")]
    Transport {
        id: usize,
        #[source]
        source: TransportError,
    },
}

/// Collector errors
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Listening endpoint could not be bound
    #[error("Collector: failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// accept(2) failed
    #[error("Collector: failed to accept connection")]
    Accept(#[source] std::io::Error),

    /// poll(2) failed
    #[error("Collector: failed to wait for readiness")]
    Poll(#[source] nix::Error),

    /// A worker connection failed
    #[error("Collector: connection from {peer} failed")]
    Peer {
        peer: SocketAddr,
        #[source]
        source: TransportError,
    },

    /// Bootstrap failed
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Writing results to the output failed
    #[error("Collector: failed to write output")]
    Output(#[source] std::io::Error),

    /// Collector process could not be forked
    #[error("Failed to fork collector process")]
    Fork(#[source] nix::Error),

    /// Collector process or thread ended abnormally
    #[error("Collector terminated abnormally: {0}")]
    Terminated(String),
}

/// Result type alias for StatError
pub type Result<T> = std::result::Result<T, StatError>;

/// Render an error followed by each of its causes, colon separated
pub fn display_chain(err: &(dyn std::error::Error + 'static)) -> String {
    std::iter::successors(Some(err), |e| e.source())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}
