//! The relay hub.
//!
//! The hub owns the connection registry, channel router and producer
//! bookkeeping behind a single lock, plus the channel state store. Socket
//! tasks feed it decoded text frames; every reply and delivery goes out
//! through the target connection's outbound queue, so no handler awaits while
//! holding shared state.

use crate::channel::{parse_channels, ChannelId};
use crate::connection::{ConnectionHandle, ConnectionId, Endpoint, Role};
use crate::message::{now_millis, Outbound};
use crate::producer::{verify_password, ProducerRegistry, SyncCache, DEFAULT_SYNC_FIELD};
use crate::registry::Registry;
use crate::router::{Router, RouterError};
use crate::state::StateStore;
use crate::status::{StatusPublisher, StatusUpdate, TracingStatusPublisher};
use beacon_protocol::{
    codec, ClientFrame, ErrorReason, EventKind, ProducerEvent, ServerFrame, StateAction,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Shared secret producers authenticate with. `None` rejects every attempt.
    pub producer_password: Option<String>,
    /// Payload field delivered only once per receiving connection.
    pub sync_field: String,
    /// Device whose events are forwarded to the status publisher.
    pub status_device: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            producer_password: None,
            sync_field: DEFAULT_SYNC_FIELD.to_string(),
            status_device: None,
        }
    }
}

struct HubState {
    registry: Registry,
    router: Router,
    producers: ProducerRegistry,
    sync: SyncCache,
}

impl HubState {
    /// Remove a connection and everything that references it.
    ///
    /// Returns `false` if the connection was already gone.
    fn disconnect(&mut self, id: ConnectionId) -> bool {
        let Some(mut info) = self.registry.unregister(id) else {
            return false;
        };
        info.handle.mark_closed();
        self.router.unsubscribe_all(&mut info);

        if let Role::Producer { device } = &info.role {
            if self.producers.release(device, id) {
                info!(connection = %id, device = %device, "Producer disconnected");
                let notice = ServerFrame::Offline {
                    device: device.clone(),
                    timestamp: now_millis(),
                };
                if let Some(text) = encode_shared(&notice) {
                    for other in self.registry.iter() {
                        other.handle.send_text(text.clone());
                    }
                }
            }
        }

        debug!(connection = %id, address = %info.address, "Disconnected");
        true
    }
}

/// Result of one liveness sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections sent a heartbeat probe.
    pub probed: usize,
    /// Connections terminated for missing the previous probe.
    pub terminated: Vec<ConnectionId>,
}

/// Hub statistics.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub channels: usize,
    pub subscriptions: usize,
    pub producers: usize,
    pub documents: usize,
}

/// The relay hub.
pub struct Hub {
    inner: Mutex<HubState>,
    state: StateStore,
    config: HubConfig,
    publisher: Arc<dyn StatusPublisher>,
}

impl Hub {
    /// Create a hub that logs status updates.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self::with_publisher(config, Arc::new(TracingStatusPublisher))
    }

    /// Create a hub with a custom status publisher.
    #[must_use]
    pub fn with_publisher(config: HubConfig, publisher: Arc<dyn StatusPublisher>) -> Self {
        info!(
            producer_auth = config.producer_password.is_some(),
            sync_field = %config.sync_field,
            status_publisher = publisher.name(),
            "Creating hub"
        );
        Self {
            inner: Mutex::new(HubState {
                registry: Registry::new(),
                router: Router::new(),
                producers: ProducerRegistry::new(),
                sync: SyncCache::new(config.sync_field.clone()),
            }),
            state: StateStore::new(),
            config,
            publisher,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection.
    ///
    /// Relay connections are greeted with a `welcome` frame. The returned
    /// receiver must be drained by the task that owns the socket.
    pub fn connect(
        &self,
        address: impl Into<String>,
        endpoint: Endpoint,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::new();
        let mut state = self.lock();
        let info = state.registry.register(handle.clone(), address, endpoint);
        if endpoint == Endpoint::Relay {
            send_frame(
                &info.handle,
                &ServerFrame::Welcome {
                    address: info.address.clone(),
                },
            );
        }
        (handle, rx)
    }

    /// Run disconnect cleanup for a connection. Idempotent.
    pub fn disconnect(&self, id: ConnectionId) {
        self.lock().disconnect(id);
    }

    /// Record a heartbeat reply.
    pub fn mark_alive(&self, id: ConnectionId) {
        self.lock().registry.mark_alive(id);
    }

    /// Answer a connection with an error frame.
    pub fn reject(&self, id: ConnectionId, reason: ErrorReason) {
        self.reply(id, &ServerFrame::error(reason));
    }

    /// Run one liveness tick.
    ///
    /// Connections that did not answer the previous probe are terminated and
    /// cleaned up; the rest are marked pending and probed again.
    pub fn sweep(&self) -> SweepReport {
        let mut state = self.lock();
        let mut report = SweepReport::default();

        for info in state.registry.iter_mut() {
            if info.is_alive {
                info.is_alive = false;
                info.handle.send(Outbound::Ping);
                report.probed += 1;
            } else {
                report.terminated.push(info.id());
            }
        }

        for id in &report.terminated {
            if let Some(info) = state.registry.get(*id) {
                warn!(connection = %id, address = %info.address, "Terminating dead connection");
                info.handle.terminate();
            }
            state.disconnect(*id);
        }

        report
    }

    /// Handle one inbound text frame.
    pub fn handle_text(&self, id: ConnectionId, text: &str) {
        trace!(connection = %id, bytes = text.len(), "Received");
        match codec::decode(text) {
            Ok(frame) => self.handle_frame(id, frame, text),
            Err(e) => {
                debug!(connection = %id, error = %e, "Rejected frame");
                self.reject(id, e.reason());
            }
        }
    }

    fn handle_frame(&self, id: ConnectionId, frame: ClientFrame, raw: &str) {
        if let Some((kind, data)) = frame.as_event() {
            self.publish_event(id, kind, data.clone());
            return;
        }

        match frame {
            ClientFrame::Auth { password, device } => self.authenticate(id, password, device),
            ClientFrame::Ping { id: ping_id } => self.reply(
                id,
                &ServerFrame::Pong {
                    id: ping_id,
                    time: now_millis(),
                },
            ),
            ClientFrame::Connect { channel } => {
                if let Some(subscribed) = self.subscribe(id, channel.as_ref()) {
                    self.reply(id, &ServerFrame::Connected { subscribed });
                }
            }
            ClientFrame::Subscribe { channel } => {
                if let Some(subscribed) = self.subscribe(id, channel.as_ref()) {
                    self.reply(id, &ServerFrame::Subscribed { subscribed });
                }
            }
            ClientFrame::Unsubscribe { channel } => {
                if let Some(subscribed) = self.unsubscribe(id, channel.as_ref()) {
                    self.reply(id, &ServerFrame::Unsubscribed { subscribed });
                }
            }
            ClientFrame::UnsubscribeAll => {
                let mut guard = self.lock();
                let HubState {
                    registry, router, ..
                } = &mut *guard;
                if let Some(info) = registry.get_mut(id) {
                    router.unsubscribe_all(info);
                    send_frame(&info.handle, &ServerFrame::UnsubscribedAll);
                }
            }
            ClientFrame::Broadcast { channel, data } => {
                let names = parse_channels(channel.as_ref());
                self.broadcast(id, &names, &data);
            }
            ClientFrame::State {
                channel,
                action,
                data,
                req_id,
            } => self.apply_state(id, channel.as_ref(), action.as_deref(), &data, req_id),
            ClientFrame::Request { device } => self.forward_request(id, device.as_deref(), raw),
            ClientFrame::Sample { .. }
            | ClientFrame::Aggregate { .. }
            | ClientFrame::Screenshot { .. }
            | ClientFrame::Unknown => self.reject(id, ErrorReason::TypeUnknown),
        }
    }

    fn reply(&self, id: ConnectionId, frame: &ServerFrame) {
        let handle = self.lock().registry.get(id).map(|info| info.handle.clone());
        if let Some(handle) = handle {
            send_frame(&handle, frame);
        }
    }

    fn subscribe(&self, id: ConnectionId, channel: Option<&Value>) -> Option<Vec<ChannelId>> {
        let names = parse_channels(channel);
        let mut guard = self.lock();
        let HubState {
            registry, router, ..
        } = &mut *guard;
        let info = registry.get_mut(id)?;
        router.subscribe(info, &names);
        Some(info.subscription_list())
    }

    fn unsubscribe(&self, id: ConnectionId, channel: Option<&Value>) -> Option<Vec<ChannelId>> {
        let names = parse_channels(channel);
        let mut guard = self.lock();
        let HubState {
            registry, router, ..
        } = &mut *guard;
        let info = registry.get_mut(id)?;
        router.unsubscribe(info, &names);
        Some(info.subscription_list())
    }

    fn broadcast(&self, id: ConnectionId, names: &[ChannelId], data: &Value) {
        let state = self.lock();
        match state.router.broadcast(&state.registry, id, names, data) {
            Ok(count) => debug!(connection = %id, recipients = count, "Broadcast delivered"),
            Err(RouterError::NoChannel) => {
                if let Some(info) = state.registry.get(id) {
                    send_frame(&info.handle, &ServerFrame::error(ErrorReason::NoChannel));
                }
            }
            Err(e) => warn!(connection = %id, error = %e, "Broadcast failed"),
        }
    }

    fn apply_state(
        &self,
        id: ConnectionId,
        channel: Option<&Value>,
        action: Option<&str>,
        data: &Value,
        req_id: Option<Value>,
    ) {
        let names = parse_channels(channel);
        if names.is_empty() {
            return self.reject(id, ErrorReason::NoChannel);
        }
        let Some(action) = action.and_then(|a| a.parse::<StateAction>().ok()) else {
            return self.reject(id, ErrorReason::InvalidStateAction);
        };

        let result = self.state.apply(action, &names, data);
        self.reply(
            id,
            &ServerFrame::State {
                action: action.as_str().to_string(),
                result,
                req_id,
            },
        );
    }

    fn authenticate(&self, id: ConnectionId, password: Option<String>, device: Option<String>) {
        let mut guard = self.lock();
        let HubState {
            registry,
            producers,
            ..
        } = &mut *guard;
        let Some(info) = registry.get_mut(id) else {
            return;
        };

        if !verify_password(self.config.producer_password.as_deref(), password.as_deref()) {
            warn!(connection = %id, address = %info.address, "Producer authentication failed");
            send_frame(&info.handle, &ServerFrame::AuthFailed);
            info.handle.close();
            return;
        }

        let device = device.unwrap_or_else(|| id.to_string());
        if let Role::Producer { device: previous } = &info.role {
            if previous != &device {
                producers.release(previous, id);
            }
        }
        producers.claim(&device, id);
        info.role = Role::Producer {
            device: device.clone(),
        };

        send_frame(
            &info.handle,
            &ServerFrame::AuthOk {
                device: Some(device.clone()),
            },
        );
        info!(connection = %id, device = %device, "Producer authenticated");
    }

    fn publish_event(&self, id: ConnectionId, kind: EventKind, mut data: Value) {
        let mut guard = self.lock();
        let HubState { registry, sync, .. } = &mut *guard;

        let device = match registry.get(id) {
            Some(info) => match info.role.device() {
                Some(device) => device.to_string(),
                None => {
                    send_frame(&info.handle, &ServerFrame::error(ErrorReason::Unauthorized));
                    return;
                }
            },
            None => return,
        };

        sync.observe(&device, &mut data);
        let timestamp = now_millis();
        let event = |data: Value| {
            ServerFrame::event(
                kind,
                ProducerEvent {
                    data,
                    device: device.clone(),
                    timestamp,
                },
            )
        };

        let Some(plain) = encode_shared(&event(data.clone())) else {
            return;
        };
        let first = sync
            .attach(&device, &data)
            .and_then(|with_field| encode_shared(&event(with_field)));

        let mut delivered = 0usize;
        for info in registry.iter_mut() {
            if info.id() == id || !info.handle.is_open() {
                continue;
            }
            let text = match &first {
                Some(text) if !info.synced => {
                    info.synced = true;
                    text.clone()
                }
                _ => plain.clone(),
            };
            if info.handle.send_text(text) {
                delivered += 1;
            }
        }
        drop(guard);

        trace!(connection = %id, device = %device, kind = %kind, recipients = delivered, "Producer event");

        if self.config.status_device.as_deref() == Some(device.as_str()) {
            self.publish_status(StatusUpdate::from_event(kind, &data));
        }
    }

    fn publish_status(&self, update: StatusUpdate) {
        let publisher = Arc::clone(&self.publisher);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = publisher.publish(update).await {
                        warn!(publisher = publisher.name(), error = %e, "Status publish failed");
                    }
                });
            }
            Err(_) => debug!("No runtime available, status update dropped"),
        }
    }

    fn forward_request(&self, id: ConnectionId, device: Option<&str>, raw: &str) {
        let state = self.lock();
        let target = device
            .and_then(|device| state.producers.connection_for(device))
            .and_then(|target| state.registry.get(target))
            .filter(|info| info.handle.is_open());

        match target {
            Some(info) => {
                info.handle.send_text(Arc::from(raw));
                trace!(connection = %id, target = %info.id(), "Forwarded device request");
            }
            None => {
                if let Some(info) = state.registry.get(id) {
                    send_frame(&info.handle, &ServerFrame::error(ErrorReason::DeviceOffline));
                }
            }
        }
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let state = self.lock();
        let router = state.router.stats();
        HubStats {
            connections: state.registry.len(),
            channels: router.channel_count,
            subscriptions: router.total_subscriptions,
            producers: state.producers.len(),
            documents: self.state.len(),
        }
    }

    /// Channels a connection is subscribed to.
    #[must_use]
    pub fn subscriptions(&self, id: ConnectionId) -> Option<Vec<ChannelId>> {
        self.lock().registry.get(id).map(|info| info.subscription_list())
    }

    /// Role of a connection.
    #[must_use]
    pub fn role(&self, id: ConnectionId) -> Option<Role> {
        self.lock().registry.get(id).map(|info| info.role.clone())
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.lock().registry.contains(id)
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, channel_name: &str) -> bool {
        self.lock().router.channel_exists(channel_name)
    }

    /// Get the subscriber count for a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel_name: &str) -> usize {
        self.lock().router.subscriber_count(channel_name)
    }

    /// Authenticated producer devices.
    #[must_use]
    pub fn producer_devices(&self) -> Vec<String> {
        self.lock().producers.devices()
    }

    /// The channel state store.
    #[must_use]
    pub fn state_store(&self) -> &StateStore {
        &self.state
    }
}

fn encode_shared(frame: &ServerFrame) -> Option<Arc<str>> {
    match codec::encode(frame) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            warn!(error = %e, "Failed to encode frame");
            None
        }
    }
}

fn send_frame(handle: &ConnectionHandle, frame: &ServerFrame) -> bool {
    match encode_shared(frame) {
        Some(text) => handle.send_text(text),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusError;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    const PASSWORD: &str = "hunter2";

    fn hub() -> Hub {
        Hub::new(HubConfig {
            producer_password: Some(PASSWORD.to_string()),
            ..HubConfig::default()
        })
    }

    struct Peer {
        id: ConnectionId,
        rx: UnboundedReceiver<Outbound>,
    }

    impl Peer {
        fn join(hub: &Hub, address: &str, endpoint: Endpoint) -> Self {
            let (handle, rx) = hub.connect(address, endpoint);
            let mut peer = Self { id: handle.id(), rx };
            peer.frames();
            peer
        }

        fn items(&mut self) -> Vec<Outbound> {
            let mut out = Vec::new();
            while let Ok(item) = self.rx.try_recv() {
                out.push(item);
            }
            out
        }

        fn frames(&mut self) -> Vec<Value> {
            self.items()
                .iter()
                .filter_map(Outbound::as_text)
                .map(|text| serde_json::from_str(text).unwrap())
                .collect()
        }

        fn send(&self, hub: &Hub, frame: Value) {
            hub.handle_text(self.id, &frame.to_string());
        }
    }

    fn producer(hub: &Hub, device: &str) -> Peer {
        let peer = Peer::join(hub, "10.0.0.9", Endpoint::Producer);
        peer.send(hub, json!({"type": "auth", "password": PASSWORD, "device": device}));
        let mut peer = peer;
        peer.frames();
        peer
    }

    #[test]
    fn test_welcome_on_relay_endpoint_only() {
        let hub = hub();
        let (_relay, mut relay_rx) = hub.connect("10.0.0.1", Endpoint::Relay);
        let (_prod, mut prod_rx) = hub.connect("10.0.0.2", Endpoint::Producer);

        let welcome = relay_rx.try_recv().unwrap();
        let welcome: Value = serde_json::from_str(welcome.as_text().unwrap()).unwrap();
        assert_eq!(welcome, json!({"type": "welcome", "address": "10.0.0.1"}));
        assert!(prod_rx.try_recv().is_err());
    }

    #[test]
    fn test_room_broadcast_scenario() {
        let hub = hub();
        let mut a = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);
        let mut b = Peer::join(&hub, "10.0.0.2", Endpoint::Relay);

        a.send(&hub, json!({"type": "subscribe", "channel": "room1"}));
        assert_eq!(a.frames(), vec![json!({"type": "subscribed", "subscribed": ["room1"]})]);

        b.send(&hub, json!({"type": "subscribe", "channel": ["room1", "room2"]}));
        assert_eq!(
            b.frames(),
            vec![json!({"type": "subscribed", "subscribed": ["room1", "room2"]})]
        );

        a.send(&hub, json!({"type": "broadcast", "channel": "room1", "data": {"x": 1}}));
        assert_eq!(
            b.frames(),
            vec![json!({"type": "broadcast", "from": "10.0.0.1", "channel": "room1", "data": {"x": 1}})]
        );
        assert!(a.frames().is_empty());
    }

    #[test]
    fn test_state_scenario() {
        let hub = hub();
        let mut a = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);

        a.send(&hub, json!({"type": "state", "channel": "cfg", "action": "add", "data": {"k": 1}}));
        assert_eq!(
            a.frames(),
            vec![json!({"type": "state", "action": "add", "result": {"cfg": {"k": 1}}})]
        );

        a.send(&hub, json!({"type": "state", "channel": "cfg", "action": "remove", "data": ["k"]}));
        a.frames();

        a.send(&hub, json!({"type": "state", "channel": "cfg", "action": "get", "reqId": 3}));
        assert_eq!(
            a.frames(),
            vec![json!({"type": "state", "action": "get", "result": {"cfg": {}}, "reqId": 3})]
        );
    }

    #[test]
    fn test_state_errors() {
        let hub = hub();
        let mut a = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);

        a.send(&hub, json!({"type": "state", "action": "get"}));
        assert_eq!(a.frames(), vec![json!({"type": "error", "reason": "no-channel"})]);

        a.send(&hub, json!({"type": "state", "channel": "cfg", "action": "merge"}));
        assert_eq!(
            a.frames(),
            vec![json!({"type": "error", "reason": "invalid-state-action"})]
        );
    }

    #[test]
    fn test_malformed_input_keeps_connection_open() {
        let hub = hub();
        let mut a = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);

        hub.handle_text(a.id, "{oops");
        hub.handle_text(a.id, r#"{"type":"warp"}"#);
        a.send(&hub, json!({"type": "broadcast", "channel": "", "data": 1}));
        a.send(&hub, json!({"type": "broadcast", "channel": "[nope", "data": 1}));

        assert_eq!(
            a.frames(),
            vec![
                json!({"type": "error", "reason": "invalid-json"}),
                json!({"type": "error", "reason": "type-unknown"}),
                json!({"type": "error", "reason": "no-channel"}),
                json!({"type": "error", "reason": "no-channel"}),
            ]
        );
        assert!(hub.is_connected(a.id));
    }

    #[test]
    fn test_ping_pong_echoes_id() {
        let hub = hub();
        let mut a = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);

        a.send(&hub, json!({"type": "ping", "id": "abc"}));
        let frames = a.frames();
        assert_eq!(frames[0]["type"], "pong");
        assert_eq!(frames[0]["id"], "abc");
        assert!(frames[0]["time"].as_u64().unwrap() > 0);

        a.send(&hub, json!({"type": "ping"}));
        let frames = a.frames();
        assert!(frames[0].get("id").is_none());
    }

    #[test]
    fn test_connect_alias_and_unsubscribe() {
        let hub = hub();
        let mut a = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);

        a.send(&hub, json!({"type": "connect", "channel": "[\"x\",\"y\"]"}));
        assert_eq!(a.frames(), vec![json!({"type": "connected", "subscribed": ["x", "y"]})]);

        a.send(&hub, json!({"type": "unsubscribe", "channel": "x"}));
        assert_eq!(a.frames(), vec![json!({"type": "unsubscribed", "subscribed": ["y"]})]);
        assert!(!hub.channel_exists("x"));

        a.send(&hub, json!({"type": "unsubscribe.all"}));
        assert_eq!(a.frames(), vec![json!({"type": "unsubscribed.all"})]);
        assert!(!hub.channel_exists("y"));
        assert_eq!(hub.subscriptions(a.id), Some(vec![]));
    }

    #[test]
    fn test_disconnect_cleans_channels() {
        let hub = hub();
        let a = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);
        a.send(&hub, json!({"type": "subscribe", "channel": ["x", "y"]}));

        hub.disconnect(a.id);
        hub.disconnect(a.id);

        assert!(!hub.is_connected(a.id));
        assert!(!hub.channel_exists("x"));
        assert!(!hub.channel_exists("y"));
        assert_eq!(hub.stats().connections, 0);
    }

    #[test]
    fn test_auth_success_records_device() {
        let hub = hub();
        let mut p = Peer::join(&hub, "10.0.0.9", Endpoint::Producer);
        assert_eq!(hub.role(p.id), Some(Role::Unauthenticated));

        p.send(&hub, json!({"type": "auth", "password": PASSWORD, "device": "desk"}));
        assert_eq!(p.frames(), vec![json!({"type": "auth_ok", "device": "desk"})]);
        assert_eq!(
            hub.role(p.id),
            Some(Role::Producer {
                device: "desk".into()
            })
        );
        assert_eq!(hub.producer_devices(), vec!["desk"]);
    }

    #[test]
    fn test_auth_failure_closes_connection() {
        let hub = hub();
        let mut p = Peer::join(&hub, "10.0.0.9", Endpoint::Producer);

        p.send(&hub, json!({"type": "auth", "password": "wrong", "device": "desk"}));
        let items = p.items();
        assert_eq!(
            serde_json::from_str::<Value>(items[0].as_text().unwrap()).unwrap(),
            json!({"type": "auth_failed"})
        );
        assert_eq!(items[1], Outbound::Close);
        assert_eq!(hub.role(p.id), Some(Role::Unauthenticated));
        assert!(hub.producer_devices().is_empty());
    }

    #[test]
    fn test_auth_without_configured_password_fails() {
        let hub = Hub::new(HubConfig::default());
        let mut p = Peer::join(&hub, "10.0.0.9", Endpoint::Producer);
        p.send(&hub, json!({"type": "auth", "password": "", "device": "desk"}));
        assert_eq!(p.frames(), vec![json!({"type": "auth_failed"})]);
    }

    #[test]
    fn test_events_require_producer_role() {
        let hub = hub();
        let mut a = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);
        let mut b = Peer::join(&hub, "10.0.0.2", Endpoint::Relay);

        a.send(&hub, json!({"type": "sample", "data": {"v": 1}}));
        assert_eq!(a.frames(), vec![json!({"type": "error", "reason": "unauthorized"})]);
        assert!(b.frames().is_empty());
    }

    #[test]
    fn test_event_fans_out_to_every_other_connection() {
        let hub = hub();
        let mut p = producer(&hub, "desk");
        let mut relay = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);
        let mut listener = Peer::join(&hub, "10.0.0.2", Endpoint::Producer);

        p.send(&hub, json!({"type": "aggregate", "data": {"cpu": 5}}));

        for peer in [&mut relay, &mut listener] {
            let frames = peer.frames();
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0]["type"], "aggregate");
            assert_eq!(frames[0]["device"], "desk");
            assert_eq!(frames[0]["data"], json!({"cpu": 5}));
            assert!(frames[0]["timestamp"].as_u64().is_some());
        }
        assert!(p.frames().is_empty());
    }

    #[test]
    fn test_sync_once_field() {
        let hub = hub();
        let mut p = producer(&hub, "desk");
        let mut early = Peer::join(&hub, "10.0.0.1", Endpoint::Producer);

        p.send(&hub, json!({"type": "sample", "data": {"v": 1, "icon": "a.png"}}));
        p.send(&hub, json!({"type": "sample", "data": {"v": 2, "icon": "a.png"}}));

        let frames = early.frames();
        assert_eq!(frames[0]["data"], json!({"v": 1, "icon": "a.png"}));
        assert_eq!(frames[1]["data"], json!({"v": 2}));

        // A late joiner gets the cached value on its first delivery even if
        // the current event does not carry it.
        let mut late = Peer::join(&hub, "10.0.0.2", Endpoint::Producer);
        p.send(&hub, json!({"type": "sample", "data": {"v": 3}}));
        p.send(&hub, json!({"type": "sample", "data": {"v": 4}}));

        let frames = late.frames();
        assert_eq!(frames[0]["data"], json!({"v": 3, "icon": "a.png"}));
        assert_eq!(frames[1]["data"], json!({"v": 4}));
        assert_eq!(early.frames()[0]["data"], json!({"v": 3}));
    }

    #[test]
    fn test_device_request_routing() {
        let hub = hub();
        let mut p = producer(&hub, "desk");
        let mut a = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);

        let request = json!({"type": "request", "device": "desk", "what": "screenshot"});
        a.send(&hub, request.clone());
        assert_eq!(p.frames(), vec![request]);

        a.send(&hub, json!({"type": "request", "device": "laptop"}));
        assert_eq!(a.frames(), vec![json!({"type": "error", "reason": "device-offline"})]);
    }

    #[test]
    fn test_producer_disconnect_announces_offline() {
        let hub = hub();
        let p = producer(&hub, "desk");
        let mut a = Peer::join(&hub, "10.0.0.1", Endpoint::Producer);

        hub.disconnect(p.id);

        let frames = a.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "offline");
        assert_eq!(frames[0]["device"], "desk");
        assert!(hub.producer_devices().is_empty());
    }

    #[test]
    fn test_superseded_producer_keeps_new_slot() {
        let hub = hub();
        let old = producer(&hub, "desk");
        let new = producer(&hub, "desk");
        let mut a = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);

        hub.disconnect(old.id);
        assert!(a.frames().is_empty());
        assert_eq!(hub.producer_devices(), vec!["desk"]);

        hub.disconnect(new.id);
        assert_eq!(a.frames()[0]["type"], "offline");
    }

    #[test]
    fn test_consumer_disconnect_sends_nothing() {
        let hub = hub();
        let a = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);
        let mut b = Peer::join(&hub, "10.0.0.2", Endpoint::Relay);

        hub.disconnect(a.id);
        assert!(b.frames().is_empty());
    }

    #[test]
    fn test_sweep_terminates_after_two_silent_ticks() {
        let hub = hub();
        let mut quiet = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);
        let mut chatty = Peer::join(&hub, "10.0.0.2", Endpoint::Relay);
        quiet.send(&hub, json!({"type": "subscribe", "channel": "room"}));
        quiet.frames();

        let report = hub.sweep();
        assert_eq!(report.probed, 2);
        assert!(report.terminated.is_empty());
        assert_eq!(quiet.items(), vec![Outbound::Ping]);
        assert_eq!(chatty.items(), vec![Outbound::Ping]);

        hub.mark_alive(chatty.id);
        let report = hub.sweep();
        assert_eq!(report.terminated, vec![quiet.id]);
        assert_eq!(report.probed, 1);

        assert_eq!(quiet.items(), vec![Outbound::Terminate]);
        assert!(!hub.is_connected(quiet.id));
        assert!(!hub.channel_exists("room"));
        assert!(hub.is_connected(chatty.id));

        // Socket task cleanup racing the sweep is harmless
        hub.disconnect(quiet.id);
    }

    struct Recorder(mpsc::UnboundedSender<StatusUpdate>);

    #[async_trait]
    impl StatusPublisher for Recorder {
        async fn publish(&self, update: StatusUpdate) -> Result<(), StatusError> {
            self.0
                .send(update)
                .map_err(|e| StatusError::Failed(e.to_string()))
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Failing;

    #[async_trait]
    impl StatusPublisher for Failing {
        async fn publish(&self, _update: StatusUpdate) -> Result<(), StatusError> {
            Err(StatusError::Failed("service down".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_status_device_publishes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hub = Hub::with_publisher(
            HubConfig {
                producer_password: Some(PASSWORD.to_string()),
                status_device: Some("desk".into()),
                ..HubConfig::default()
            },
            Arc::new(Recorder(tx)),
        );
        let desk = producer(&hub, "desk");
        let laptop = producer(&hub, "laptop");

        laptop.send(&hub, json!({"type": "sample", "data": "ignored"}));
        desk.send(&hub, json!({"type": "sample", "data": "coding"}));

        let update = rx.recv().await.unwrap();
        assert_eq!(
            update,
            StatusUpdate {
                label: "sample".into(),
                text: "coding".into()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_status_failure_does_not_affect_routing() {
        let hub = Hub::with_publisher(
            HubConfig {
                producer_password: Some(PASSWORD.to_string()),
                status_device: Some("desk".into()),
                ..HubConfig::default()
            },
            Arc::new(Failing),
        );
        let mut desk = producer(&hub, "desk");
        let mut a = Peer::join(&hub, "10.0.0.1", Endpoint::Relay);

        desk.send(&hub, json!({"type": "sample", "data": {"v": 1}}));
        tokio::task::yield_now().await;

        assert_eq!(a.frames().len(), 1);
        assert!(desk.frames().is_empty());
        assert!(hub.is_connected(desk.id));
    }
}
