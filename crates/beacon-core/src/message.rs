//! Outbound message types for Beacon.
//!
//! Every delivery to a connection goes through its outbound queue as an
//! [`Outbound`] item; the socket task owning the connection drains it.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// An item queued for delivery to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded JSON frame (shared for zero-copy fan-out).
    Text(Arc<str>),
    /// A transport-level heartbeat probe.
    Ping,
    /// Close the connection gracefully after flushing what is queued before it.
    Close,
    /// Drop the connection immediately without a close handshake.
    Terminate,
}

impl Outbound {
    /// Get the text payload, if this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Outbound::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Current Unix time in milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
