//! # beacon-core
//!
//! Connection registry, channel routing, state store and producer fan-out for
//! the Beacon relay.
//!
//! This crate provides the building blocks the server drives:
//!
//! - **Connection** - Per-connection handle and outbound queue
//! - **Registry** - Live connections with role and liveness flag
//! - **Router** - Channel subscriptions and deduplicated broadcast
//! - **State** - Per-channel JSON documents
//! - **Producer** - Device slots and the sync-once field cache
//! - **Hub** - Frame dispatch tying the above together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Socket    │────▶│     Hub     │────▶│   Router    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │   │
//!        │ Outbound          │   └──────▶ StateStore
//!        └───────────────────┘
//!                            ▲
//!                     ┌─────────────┐
//!                     │  Liveness   │
//!                     └─────────────┘
//! ```

pub mod channel;
pub mod connection;
pub mod hub;
pub mod liveness;
pub mod message;
pub mod producer;
pub mod registry;
pub mod router;
pub mod state;
pub mod status;

pub use channel::{parse_channels, Channel, ChannelId};
pub use connection::{ConnectionHandle, ConnectionId, Endpoint, Role};
pub use hub::{Hub, HubConfig, HubStats, SweepReport};
pub use liveness::{LivenessMonitor, DEFAULT_HEARTBEAT_INTERVAL};
pub use message::{now_millis, Outbound};
pub use producer::{ProducerRegistry, SyncCache, DEFAULT_SYNC_FIELD};
pub use registry::{ConnectionInfo, Registry};
pub use router::{Router, RouterError, RouterStats};
pub use state::{Document, StateStore};
pub use status::{StatusError, StatusPublisher, StatusUpdate, TracingStatusPublisher};
