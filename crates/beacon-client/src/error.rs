//! Client error types.

use beacon_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The background connection task is gone.
    #[error("Client is closed")]
    Closed,

    /// `disconnect()` was called while the request was outstanding.
    #[error("Client disconnected")]
    Disconnected,

    /// No state reply arrived within the configured timeout.
    #[error("State request {0} timed out")]
    Timeout(u64),

    /// A frame could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
