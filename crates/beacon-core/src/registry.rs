//! Connection registry.
//!
//! Tracks every open connection together with the metadata the routing
//! layers need: recorded address, liveness flag, role, subscriptions and the
//! sync-once flag.

use crate::channel::ChannelId;
use crate::connection::{ConnectionHandle, ConnectionId, Endpoint, Role};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Per-connection metadata.
#[derive(Debug)]
pub struct ConnectionInfo {
    /// Outbound handle.
    pub handle: ConnectionHandle,
    /// Address recorded at connect time.
    pub address: String,
    /// Endpoint the connection arrived on.
    pub endpoint: Endpoint,
    /// Cleared before each heartbeat probe, set again by the reply.
    pub is_alive: bool,
    /// Producer/consumer role.
    pub role: Role,
    /// Channels this connection is subscribed to.
    pub subscriptions: BTreeSet<ChannelId>,
    /// Whether the sync-once field has been delivered on this connection.
    pub synced: bool,
}

impl ConnectionInfo {
    fn new(handle: ConnectionHandle, address: String, endpoint: Endpoint) -> Self {
        Self {
            handle,
            address,
            endpoint,
            is_alive: true,
            role: endpoint.initial_role(),
            subscriptions: BTreeSet::new(),
            synced: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Subscribed channel names in sorted order.
    #[must_use]
    pub fn subscription_list(&self) -> Vec<ChannelId> {
        self.subscriptions.iter().cloned().collect()
    }
}

/// The set of open connections.
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, ConnectionInfo>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    pub fn register(
        &mut self,
        handle: ConnectionHandle,
        address: impl Into<String>,
        endpoint: Endpoint,
    ) -> &mut ConnectionInfo {
        let id = handle.id();
        let info = ConnectionInfo::new(handle, address.into(), endpoint);
        debug!(connection = %id, address = %info.address, endpoint = endpoint.as_str(), "Registered");
        self.connections.entry(id).or_insert(info)
    }

    /// Remove a connection, returning its metadata.
    ///
    /// Channel and producer cleanup is the caller's job; see
    /// [`Hub::disconnect`](crate::Hub::disconnect).
    pub fn unregister(&mut self, id: ConnectionId) -> Option<ConnectionInfo> {
        let info = self.connections.remove(&id);
        if info.is_some() {
            debug!(connection = %id, "Unregistered");
        }
        info
    }

    /// Record a heartbeat reply.
    ///
    /// Returns `false` if the connection is unknown.
    pub fn mark_alive(&mut self, id: ConnectionId) -> bool {
        match self.connections.get_mut(&id) {
            Some(info) => {
                info.is_alive = true;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionInfo> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionInfo> {
        self.connections.get_mut(&id)
    }

    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Iterate over all connections.
    pub fn iter(&self) -> impl Iterator<Item = &ConnectionInfo> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConnectionInfo> {
        self.connections.values_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
