//! Error types for the session layer.

use thiserror::Error;

use crate::protocol::CodecError;

/// The main error type for session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No correlated response arrived within the deadline.
    #[error("no response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The device accepted the request but reported a failure status.
    #[error("device rejected request: {status}")]
    DeviceRejected { status: String },

    /// A parameter query failed while initializing the session.
    #[error("session bootstrap failed: {message}")]
    Bootstrap { message: String },

    /// The transport accepted fewer bytes than offered.
    #[error("partial write: {written} of {expected} bytes accepted")]
    PartialWrite { written: usize, expected: usize },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// Internal channel closed (session shut down).
    #[error("channel closed")]
    ChannelClosed,
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
