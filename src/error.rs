//! Error types for framelink.

use thiserror::Error;

/// Main error type for all framelink operations.
#[derive(Debug, Error)]
pub enum FramelinkError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (oversized frame declaration, malformed prefix).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Peer closed the connection before a full frame arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The operation was aborted by the shared cancellation signal.
    #[error("Cancelled by shutdown")]
    Cancelled,
}

/// Result type alias using FramelinkError.
pub type Result<T> = std::result::Result<T, FramelinkError>;
