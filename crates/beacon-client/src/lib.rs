//! # beacon-client
//!
//! Reconnecting client for the Beacon relay.
//!
//! [`BeaconClient`] keeps one logical session alive across physical
//! reconnects: outbound frames are queued while the link is down, the
//! subscription set is replayed after every reconnect, and state reads are
//! correlated with their replies by request id.
//!
//! ```no_run
//! use serde_json::json;
//! use tenvis_beacon_client::{BeaconClient, ClientConfig};
//!
//! # async fn run() -> Result<(), tenvis_beacon_client::ClientError> {
//! let client = BeaconClient::connect(ClientConfig::new("ws://127.0.0.1:8080/"));
//! let mut events = client.events();
//!
//! client.subscribe(["room1"])?;
//! client.broadcast(["room1"], json!({"x": 1}))?;
//! let cfg = client.state_get("cfg").await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event}");
//! }
//! # let _ = cfg;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod session;

pub use client::BeaconClient;
pub use config::{ClientConfig, ReconnectPolicy};
pub use error::{ClientError, Result};
pub use session::{LinkState, Session, StateResult};

pub use beacon_protocol::EventKind;
