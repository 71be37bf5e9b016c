//! # Error Types
//!
//! Custom error types for the telemetry monitor using `thiserror`.
//!
//! Errors are split by how they are handled:
//! - [`MonitorError`]: resource failures that end the process
//! - [`ParseError`]: a malformed log line, dropped and logged by the tailer
//! - [`ProtocolError`]: an unrecognized control line, logged and ignored
//! - [`BufferError`]: a sample the time-series buffer refuses to ingest

use std::path::PathBuf;
use thiserror::Error;

/// Fatal error type for the monitor
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Control pipe missing at startup
    #[error("Control pipe does not exist: {}", .0.display())]
    PipeNotFound(PathBuf),

    /// Control path exists but is not a named pipe
    #[error("Not a named pipe: {}", .0.display())]
    NotAFifo(PathBuf),

    /// Control pipe removed by someone else while we were listening
    #[error("Control pipe disappeared: {}", .0.display())]
    PipeVanished(PathBuf),

    /// Control pipe reached end of stream
    #[error("Control pipe closed unexpectedly: {}", .0.display())]
    PipeClosed(PathBuf),

    /// Filesystem watch errors
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// A background task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),
}

/// Result type alias for the monitor
pub type Result<T> = std::result::Result<T, MonitorError>;

/// A log line that does not match its schema
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field `{field}` is not a number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("field `{field}` is not finite")]
    NonFinite { field: &'static str },
}

/// A control-channel line that is neither a file pair nor the end sentinel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unrecognized control message: {0:?}")]
    Unrecognized(String),

    #[error("malformed file pair (need exactly two non-empty paths): {0:?}")]
    MalformedFilePair(String),
}

/// Reasons the time-series buffer rejects a sample
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BufferError {
    #[error("{stream}: expected {expected} fields, got {found}")]
    FieldCount {
        stream: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{stream}: timestamp {t} is older than newest buffered {newest}")]
    OutOfOrder {
        stream: &'static str,
        t: f64,
        newest: f64,
    },
}
