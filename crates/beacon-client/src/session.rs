//! Logical session state, independent of any socket.
//!
//! The session remembers what must survive a reconnect (subscriptions,
//! producer credentials, unsent frames, outstanding state requests) and
//! decides what to put on the wire. The connection task owns one and feeds
//! it transport events.

use crate::error::{ClientError, Result};
use beacon_protocol::{codec, ClientFrame, StateAction};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, VecDeque};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Result of a state request, keyed by channel name.
pub type StateResult = Map<String, Value>;

/// Physical link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
struct Credentials {
    password: String,
    device: String,
}

/// Client-side session.
#[derive(Debug)]
pub struct Session {
    state: LinkState,
    outbox: VecDeque<String>,
    subscriptions: BTreeSet<String>,
    credentials: Option<Credentials>,
    pending: HashMap<u64, oneshot::Sender<Result<StateResult>>>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
            outbox: VecDeque::new(),
            subscriptions: BTreeSet::new(),
            credentials: None,
            pending: HashMap::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Remembered subscriptions, in name order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.iter().cloned().collect()
    }

    /// Frames waiting for a connection.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    /// Outstanding state requests.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn begin_connect(&mut self) {
        self.state = LinkState::Connecting;
    }

    /// The link is up. Returns the frames to write, in order: credentials,
    /// then the queued frames, then one subscribe for every remembered
    /// channel.
    pub fn connected(&mut self) -> Vec<String> {
        self.state = LinkState::Connected;
        let mut out = Vec::with_capacity(self.outbox.len() + 2);

        if let Some(creds) = &self.credentials {
            if let Some(text) = encode(&ClientFrame::auth(&creds.password, &creds.device)) {
                out.push(text);
            }
        }
        out.extend(self.outbox.drain(..));
        if !self.subscriptions.is_empty() {
            if let Some(text) = encode(&ClientFrame::subscribe(self.subscriptions.iter())) {
                out.push(text);
            }
        }

        debug!(frames = out.len(), "Session replay");
        out
    }

    /// The link dropped. Queued frames and subscriptions are kept.
    pub fn disconnected(&mut self) {
        self.state = LinkState::Disconnected;
    }

    /// Queue `text`, or return it for immediate sending when connected.
    pub fn submit(&mut self, text: String) -> Option<String> {
        if self.state == LinkState::Connected {
            Some(text)
        } else {
            self.outbox.push_back(text);
            None
        }
    }

    /// Put back frames that could not be written, ahead of anything queued.
    pub fn requeue(&mut self, unsent: impl IntoIterator<Item = String>) {
        let mut unsent: Vec<String> = unsent.into_iter().collect();
        while let Some(text) = unsent.pop() {
            self.outbox.push_front(text);
        }
    }

    fn push(&mut self, frame: &ClientFrame) -> Option<String> {
        encode(frame).and_then(|text| self.submit(text))
    }

    /// Add channels to the subscription set and request them.
    pub fn subscribe(&mut self, channels: Vec<String>) -> Option<String> {
        if channels.is_empty() {
            return None;
        }
        self.subscriptions.extend(channels.iter().cloned());
        self.push(&ClientFrame::subscribe(channels))
    }

    /// Drop channels from the subscription set. Channels not subscribed are
    /// ignored; nothing is sent if none remain.
    pub fn unsubscribe(&mut self, channels: Vec<String>) -> Option<String> {
        let held: Vec<String> = channels
            .into_iter()
            .filter(|channel| self.subscriptions.remove(channel))
            .collect();
        if held.is_empty() {
            return None;
        }
        self.push(&ClientFrame::unsubscribe(held))
    }

    pub fn unsubscribe_all(&mut self) -> Option<String> {
        if self.subscriptions.is_empty() {
            return None;
        }
        self.subscriptions.clear();
        self.push(&ClientFrame::UnsubscribeAll)
    }

    /// Broadcast to `channels`, or to every subscribed channel when `None`.
    pub fn broadcast(&mut self, channels: Option<Vec<String>>, data: Value) -> Option<String> {
        let channels = channels.unwrap_or_else(|| self.subscriptions());
        if channels.is_empty() {
            return None;
        }
        self.push(&ClientFrame::broadcast(channels, data))
    }

    /// Remember producer credentials. They are sent now if connected and
    /// first thing after every reconnect.
    pub fn authenticate(&mut self, password: String, device: String) -> Option<String> {
        let frame = ClientFrame::auth(&password, &device);
        self.credentials = Some(Credentials { password, device });
        if self.state == LinkState::Connected {
            encode(&frame)
        } else {
            None
        }
    }

    /// Issue a state `get` correlated by `req_id`.
    pub fn state_get(
        &mut self,
        channel: String,
        req_id: u64,
        reply: oneshot::Sender<Result<StateResult>>,
    ) -> Option<String> {
        self.pending.insert(req_id, reply);
        self.push(&ClientFrame::state(channel, StateAction::Get, Value::Null, Some(req_id)))
    }

    /// Stop waiting for a request.
    pub fn forget(&mut self, req_id: u64) {
        if self.pending.remove(&req_id).is_some() {
            debug!(req_id, "State request abandoned");
        }
    }

    /// Route one inbound text frame.
    ///
    /// A `state` reply whose `reqId` matches an outstanding request resolves
    /// it and yields nothing; anything else is returned for listeners.
    /// Non-JSON text is returned as a JSON string.
    pub fn receive(&mut self, text: &str) -> Option<Value> {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return Some(Value::String(text.to_string()));
        };

        if value.get("type").and_then(Value::as_str) == Some("state") {
            let req_id = value.get("reqId").and_then(Value::as_u64);
            if let Some(reply) = req_id.and_then(|id| self.pending.remove(&id)) {
                let result = value
                    .get("result")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let _ = reply.send(Ok(result));
                return None;
            }
        }

        Some(value)
    }

    /// Explicit disconnect: forget subscriptions and credentials, and fail
    /// outstanding requests. Queued frames stay for a later reconnect.
    pub fn close(&mut self) {
        self.state = LinkState::Disconnected;
        self.subscriptions.clear();
        self.credentials = None;
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(ClientError::Disconnected));
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(frame: &ClientFrame) -> Option<String> {
    match codec::encode(frame) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, "Failed to encode frame");
            None
        }
    }
}
