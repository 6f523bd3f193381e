//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon relay.
//!
//! Every frame is a single JSON object sent as a WebSocket text message and
//! dispatched by its `type` field.
//!
//! ## Frame Types
//!
//! - `subscribe` / `unsubscribe` / `unsubscribe.all` - Channel membership
//! - `broadcast` - Fan out a payload to one or more channels
//! - `state` - Read and mutate per-channel state documents
//! - `auth` / `sample` / `aggregate` / `screenshot` - Producer events
//! - `error` - Structured error replies
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, ClientFrame};
//!
//! let frame = ClientFrame::subscribe(["room1", "room2"]);
//! let text = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&text).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{ClientFrame, ErrorReason, EventKind, ProducerEvent, ServerFrame, StateAction};
