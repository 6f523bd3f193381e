//! Channel abstraction for Beacon.
//!
//! Channels are named topics that connections subscribe to in order to
//! receive broadcasts.

use crate::connection::ConnectionId;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// A channel identifier.
pub type ChannelId = String;

/// Normalize a `channel` field into a list of channel names.
///
/// Peers send a single name, an array of names, or a string holding a JSON
/// array. A string that looks like an array but fails to parse yields an
/// empty list, as does an absent, empty, `false` or zero field.
#[must_use]
pub fn parse_channels(field: Option<&Value>) -> Vec<ChannelId> {
    match field {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Vec::new(),
        Some(Value::String(s)) if s.is_empty() => Vec::new(),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => Vec::new(),
        Some(Value::String(s)) if s.trim_start().starts_with('[') => {
            match serde_json::from_str::<Vec<Value>>(s) {
                Ok(items) => items.iter().filter_map(channel_name).collect(),
                Err(e) => {
                    debug!(error = %e, "Malformed channel list");
                    Vec::new()
                }
            }
        }
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().filter_map(channel_name).collect(),
        Some(other) => vec![other.to_string()],
    }
}

fn channel_name(value: &Value) -> Option<ChannelId> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A channel and its subscribers.
#[derive(Debug)]
pub struct Channel {
    /// Channel name.
    name: ChannelId,
    /// Set of subscribed connection IDs.
    subscribers: HashSet<ConnectionId>,
}

impl Channel {
    /// Create a new channel.
    #[must_use]
    pub fn new(name: impl Into<ChannelId>) -> Self {
        Self {
            name: name.into(),
            subscribers: HashSet::new(),
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a connection is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, connection_id: ConnectionId) -> bool {
        self.subscribers.contains(&connection_id)
    }

    /// Subscribe a connection to this channel.
    ///
    /// Returns `true` if the connection was not already subscribed.
    pub fn subscribe(&mut self, connection_id: ConnectionId) -> bool {
        let added = self.subscribers.insert(connection_id);
        if added {
            debug!(channel = %self.name, connection = %connection_id, "Connection subscribed");
        }
        added
    }

    /// Unsubscribe a connection from this channel.
    ///
    /// Returns `true` if the connection was subscribed.
    pub fn unsubscribe(&mut self, connection_id: ConnectionId) -> bool {
        let removed = self.subscribers.remove(&connection_id);
        if removed {
            debug!(channel = %self.name, connection = %connection_id, "Connection unsubscribed");
        }
        removed
    }

    /// Iterate over subscriber IDs.
    pub fn subscribers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.subscribers.iter().copied()
    }

    /// Check if the channel is empty (no subscribers).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
