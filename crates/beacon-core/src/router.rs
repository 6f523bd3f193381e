//! Channel router for Beacon.
//!
//! The router maps channel names to subscriber sets and performs
//! multi-channel, deduplicated broadcast. A channel entry exists only while it
//! has at least one subscriber.

use crate::channel::{Channel, ChannelId};
use crate::connection::ConnectionId;
use crate::registry::{ConnectionInfo, Registry};
use beacon_protocol::{codec, ProtocolError, ServerFrame};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Broadcast named no channel.
    #[error("No channel given")]
    NoChannel,

    /// Envelope could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// The channel router.
#[derive(Debug, Default)]
pub struct Router {
    /// Channels indexed by name.
    channels: HashMap<ChannelId, Channel>,
}

impl Router {
    /// Create a new router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            channel_count: self.channels.len(),
            total_subscriptions: self.channels.values().map(Channel::subscriber_count).sum(),
        }
    }

    /// Subscribe a connection to channels. Idempotent.
    pub fn subscribe(&mut self, info: &mut ConnectionInfo, names: &[ChannelId]) {
        let id = info.id();
        for name in names {
            let channel = self.channels.entry(name.clone()).or_insert_with(|| {
                debug!(channel = %name, "Creating new channel");
                Channel::new(name.clone())
            });
            channel.subscribe(id);
            info.subscriptions.insert(name.clone());
        }
    }

    /// Unsubscribe a connection from channels, deleting channels left empty.
    pub fn unsubscribe(&mut self, info: &mut ConnectionInfo, names: &[ChannelId]) {
        let id = info.id();
        for name in names {
            info.subscriptions.remove(name);
            self.leave(id, name);
        }
    }

    /// Unsubscribe a connection from every channel it belongs to.
    pub fn unsubscribe_all(&mut self, info: &mut ConnectionInfo) {
        let id = info.id();
        for name in std::mem::take(&mut info.subscriptions) {
            self.leave(id, &name);
        }
        debug!(connection = %id, "Unsubscribed from all channels");
    }

    fn leave(&mut self, id: ConnectionId, name: &str) {
        let Some(channel) = self.channels.get_mut(name) else {
            return;
        };
        channel.unsubscribe(id);
        if channel.is_empty() {
            self.channels.remove(name);
            debug!(channel = %name, "Deleted empty channel");
        }
    }

    /// Broadcast `data` to the subscribers of the named channels.
    ///
    /// Each distinct open subscriber receives the envelope once, tagged with
    /// the first requested channel it belongs to. The sender never receives
    /// its own broadcast. Returns the number of deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NoChannel`] if `names` is empty.
    pub fn broadcast(
        &self,
        registry: &Registry,
        from: ConnectionId,
        names: &[ChannelId],
        data: &Value,
    ) -> Result<usize, RouterError> {
        if names.is_empty() {
            return Err(RouterError::NoChannel);
        }

        let sender_address = registry.get(from).map(|info| info.address.clone());
        let mut sent: HashSet<ConnectionId> = HashSet::new();

        for name in names {
            let Some(channel) = self.channels.get(name) else {
                continue;
            };

            let mut envelope: Option<Arc<str>> = None;
            for id in channel.subscribers() {
                if id == from || sent.contains(&id) {
                    continue;
                }
                let Some(info) = registry.get(id) else {
                    continue;
                };
                if !info.handle.is_open() {
                    continue;
                }

                let text = match &envelope {
                    Some(text) => text.clone(),
                    None => {
                        let frame = ServerFrame::Broadcast {
                            from: sender_address.clone(),
                            channel: name.clone(),
                            data: data.clone(),
                        };
                        let text: Arc<str> = Arc::from(codec::encode(&frame)?);
                        envelope = Some(text.clone());
                        text
                    }
                };

                sent.insert(id);
                info.handle.send_text(text);
            }
        }

        trace!(connection = %from, channels = names.len(), recipients = sent.len(), "Broadcast");
        Ok(sent.len())
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, channel_name: &str) -> bool {
        self.channels.contains_key(channel_name)
    }

    /// Get the subscriber count for a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel_name: &str) -> usize {
        self.channels
            .get(channel_name)
            .map(Channel::subscriber_count)
            .unwrap_or(0)
    }

    /// Get all channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }
}

/// Router statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    /// Number of active channels.
    pub channel_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}
