//! # beacon-server
//!
//! WebSocket front end for the Beacon relay: endpoint routing, socket pumps,
//! configuration and Prometheus metrics around a [`tenvis_beacon_core::Hub`].

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{app, run_server, serve, AppState};
