//! Error taxonomy for the diagnostic pipeline.
//!
//! Startup errors are fatal and collected as a list (see
//! [`StartupError`] and `Pipeline::start`). Everything else — capture
//! thread failures, malformed packets, per-packet processing faults,
//! callback panics — is non-fatal and only ever recorded in counters;
//! see `Pipeline::debug_info`.

use thiserror::Error;

/// Errors that can prevent the pipeline from starting at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    #[error("missing capture dependency: {0}")]
    MissingDependency(String),
    #[error("insufficient privileges to open interface {0}")]
    InsufficientPrivileges(String),
    #[error("unknown interface: {0}")]
    UnknownInterface(String),
    #[error("invalid BPF filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },
}

/// Operational errors surfaced to callers of non-startup APIs (platform
/// counter reads, pcap file I/O). Never crosses the pipeline worker
/// boundary — see §7 of the design for the propagation policy.
#[derive(Error, Debug)]
pub enum NetdiagError {
    #[error("interface {0} not found")]
    InterfaceNotFound(String),
    #[error("platform counters unavailable for {interface}: {reason}")]
    CountersUnavailable { interface: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed pcap file: {0}")]
    MalformedPcap(String),
}

pub type Result<T> = std::result::Result<T, NetdiagError>;
