//! Error types shared by every chainfs service.
//!
//! `Error` is what Rust code propagates with `?`. `ErrorCode` is its wire-stable
//! mirror: services never ship an `Error` across the network, they fold it into a
//! FAILURE response carrying the code and a human-readable message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating or storing blocks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Write-open on a path that already has a committed file.
    #[error("file {0} already exists")]
    AlreadyExists(String),
    /// Missing file, lease or replica.
    #[error("not found: {0}")]
    NotFound(String),
    /// Lost a creation race, or a shared lock could not be obtained in time.
    #[error("lock contended on {0}")]
    LockContended(String),
    /// A release named the wrong path or mode for its lease.
    #[error("lock mismatch: {0}")]
    LockMismatch(String),
    /// Not enough live storage nodes to satisfy the replication factor.
    #[error("need {needed} storage nodes, only {available} available")]
    InsufficientNodes { needed: usize, available: usize },
    /// Block persistence failed on the local node.
    #[error("local I/O failure: {0}")]
    LocalIo(String),
    /// A peer node or the coordinator could not be reached.
    #[error("{addr} unreachable: {reason}")]
    RemoteUnreachable { addr: String, reason: String },
    /// A single attempt did not finish within its deadline.
    #[error("{0} timed out")]
    Timeout(String),
    /// The bounded retry budget was used up.
    #[error("{what} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        what: String,
        attempts: u32,
        last: String,
    },
    /// The envelope failed to parse, or carried the wrong payload.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A service answered with a FAILURE response.
    #[error("{code}: {message}")]
    Rejected { code: ErrorCode, message: String },
}

impl Error {
    /// Whether a caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RemoteUnreachable { .. } | Error::Timeout(_))
    }

    /// Wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::LockContended(_) => ErrorCode::LockContended,
            Error::LockMismatch(_) => ErrorCode::LockMismatch,
            Error::InsufficientNodes { .. } => ErrorCode::InsufficientNodes,
            Error::LocalIo(_) => ErrorCode::LocalIoFailure,
            Error::RemoteUnreachable { .. } => ErrorCode::RemoteUnreachable,
            Error::Timeout(_) => ErrorCode::Timeout,
            Error::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            Error::Malformed(_) => ErrorCode::MalformedMessage,
            Error::Config(_) => ErrorCode::Config,
            Error::Rejected { code, .. } => *code,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::LocalIo(e.to_string())
    }
}

/// Wire-stable error taxonomy carried in FAILURE responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    AlreadyExists,
    NotFound,
    LockContended,
    LockMismatch,
    InsufficientNodes,
    LocalIoFailure,
    RemoteUnreachable,
    Timeout,
    RetriesExhausted,
    MalformedMessage,
    Config,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::LockContended => "LOCK_CONTENDED",
            ErrorCode::LockMismatch => "LOCK_MISMATCH",
            ErrorCode::InsufficientNodes => "INSUFFICIENT_NODES",
            ErrorCode::LocalIoFailure => "LOCAL_IO_FAILURE",
            ErrorCode::RemoteUnreachable => "REMOTE_UNREACHABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::RetriesExhausted => "RETRIES_EXHAUSTED",
            ErrorCode::MalformedMessage => "MALFORMED_MESSAGE",
            ErrorCode::Config => "CONFIG",
        };
        f.write_str(s)
    }
}
