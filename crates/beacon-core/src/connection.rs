//! Connection handles and roles.
//!
//! A [`ConnectionHandle`] is the core's view of one open peer: an id, an
//! outbound queue and an open flag. The socket task that owns the actual
//! WebSocket holds the matching receiver.

use crate::message::Outbound;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// The endpoint a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// General pub/sub endpoint; peers start as consumers and get a `welcome`.
    Relay,
    /// Producer endpoint; peers start unauthenticated.
    Producer,
}

impl Endpoint {
    /// Role a connection starts with on this endpoint.
    #[must_use]
    pub fn initial_role(self) -> Role {
        match self {
            Endpoint::Relay => Role::Consumer,
            Endpoint::Producer => Role::Unauthenticated,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::Relay => "relay",
            Endpoint::Producer => "producer",
        }
    }
}

/// Role of a connection in the producer/consumer protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// Arrived on the producer endpoint and has not authenticated.
    Unauthenticated,
    /// Plain pub/sub peer.
    Consumer,
    /// Authenticated producer owning a device identifier.
    Producer { device: String },
}

impl Role {
    /// Device identifier, if this is a producer.
    #[must_use]
    pub fn device(&self) -> Option<&str> {
        match self {
            Role::Producer { device } => Some(device),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_producer(&self) -> bool {
        matches!(self, Role::Producer { .. })
    }
}

/// Handle to an open connection.
///
/// Cloning the handle shares the same queue and open flag.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its socket task drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: ConnectionId::next(),
            tx,
            open: Arc::new(AtomicBool::new(true)),
        };
        (handle, rx)
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Check if the connection is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    /// Queue an item for delivery.
    ///
    /// Returns `false` if the connection is closed.
    pub fn send(&self, item: Outbound) -> bool {
        if !self.is_open() {
            return false;
        }
        self.tx.send(item).is_ok()
    }

    /// Queue an encoded text frame.
    pub fn send_text(&self, text: Arc<str>) -> bool {
        self.send(Outbound::Text(text))
    }

    /// Close gracefully. Items queued before the close are still delivered.
    ///
    /// Closing an already-closed connection is a no-op.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(Outbound::Close);
        }
    }

    /// Drop the connection without a close handshake.
    ///
    /// Terminating an already-closed connection is a no-op.
    pub fn terminate(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(Outbound::Terminate);
        }
    }

    /// Mark the connection closed without queueing anything.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
