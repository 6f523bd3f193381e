//! Frame types for the Beacon protocol.
//!
//! Frames are JSON objects tagged by a `type` field. Channel fields are kept
//! as raw JSON values because peers send them as a single string, an array of
//! strings, or a string holding a JSON array; the relay normalizes them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Role-gated event kinds a producer may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Sample,
    Aggregate,
    Screenshot,
}

impl EventKind {
    /// Wire name of the event kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Sample => "sample",
            EventKind::Aggregate => "aggregate",
            EventKind::Screenshot => "screenshot",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel state actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateAction {
    /// Shallow-merge an object into the document.
    Add,
    /// Delete a list of keys from the document.
    Remove,
    /// Read the document.
    Get,
}

impl StateAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StateAction::Add => "add",
            StateAction::Remove => "remove",
            StateAction::Get => "get",
        }
    }
}

impl FromStr for StateAction {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(StateAction::Add),
            "remove" => Ok(StateAction::Remove),
            "get" => Ok(StateAction::Get),
            _ => Err("Invalid state action"),
        }
    }
}

/// Reasons carried by `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorReason {
    /// The frame was not valid JSON.
    InvalidJson,
    /// The `type` field was missing or not recognized.
    TypeUnknown,
    /// A channel-scoped request named no channel.
    NoChannel,
    /// `state` with an action other than add/remove/get.
    InvalidStateAction,
    /// A known frame type with wrong-shaped fields.
    InvalidMessage,
    /// A role-gated frame from a connection that is not a producer.
    Unauthorized,
    /// A `request` addressed to a device with no live session.
    DeviceOffline,
    /// The frame exceeded the configured size limit.
    FrameTooLarge,
}

impl ErrorReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReason::InvalidJson => "invalid-json",
            ErrorReason::TypeUnknown => "type-unknown",
            ErrorReason::NoChannel => "no-channel",
            ErrorReason::InvalidStateAction => "invalid-state-action",
            ErrorReason::InvalidMessage => "invalid-message",
            ErrorReason::Unauthorized => "unauthorized",
            ErrorReason::DeviceOffline => "device-offline",
            ErrorReason::FrameTooLarge => "frame-too-large",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame sent by a peer to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Producer credential.
    #[serde(rename = "auth")]
    Auth {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
    },

    /// Application-level ping, answered with `pong`.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },

    /// Legacy alias of `subscribe`, answered with `connected`.
    #[serde(rename = "connect")]
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<Value>,
    },

    /// Join one or more channels.
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<Value>,
    },

    /// Leave one or more channels.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<Value>,
    },

    /// Leave every channel.
    #[serde(rename = "unsubscribe.all")]
    UnsubscribeAll,

    /// Fan out `data` to the subscribers of the named channels.
    #[serde(rename = "broadcast")]
    Broadcast {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<Value>,
        #[serde(default)]
        data: Value,
    },

    /// Channel state operation.
    #[serde(rename = "state")]
    State {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        data: Value,
        /// Correlation id echoed in the reply.
        #[serde(rename = "reqId", default, skip_serializing_if = "Option::is_none")]
        req_id: Option<Value>,
    },

    #[serde(rename = "sample")]
    Sample {
        #[serde(default)]
        data: Value,
    },

    #[serde(rename = "aggregate")]
    Aggregate {
        #[serde(default)]
        data: Value,
    },

    #[serde(rename = "screenshot")]
    Screenshot {
        #[serde(default)]
        data: Value,
    },

    /// A request addressed to one authenticated producer device.
    #[serde(rename = "request")]
    Request {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
    },

    /// Any `type` the relay does not know.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// Create an auth frame.
    #[must_use]
    pub fn auth(password: impl Into<String>, device: impl Into<String>) -> Self {
        ClientFrame::Auth {
            password: Some(password.into()),
            device: Some(device.into()),
        }
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(id: Option<Value>) -> Self {
        ClientFrame::Ping { id }
    }

    /// Create a subscribe frame for a list of channels.
    #[must_use]
    pub fn subscribe<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClientFrame::Subscribe {
            channel: Some(channel_array(channels)),
        }
    }

    /// Create an unsubscribe frame for a list of channels.
    #[must_use]
    pub fn unsubscribe<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClientFrame::Unsubscribe {
            channel: Some(channel_array(channels)),
        }
    }

    /// Create a broadcast frame.
    #[must_use]
    pub fn broadcast<I, S>(channels: I, data: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClientFrame::Broadcast {
            channel: Some(channel_array(channels)),
            data,
        }
    }

    /// Create a state frame.
    #[must_use]
    pub fn state(
        channel: impl Into<String>,
        action: StateAction,
        data: Value,
        req_id: Option<u64>,
    ) -> Self {
        ClientFrame::State {
            channel: Some(Value::String(channel.into())),
            action: Some(action.as_str().to_string()),
            data,
            req_id: req_id.map(Value::from),
        }
    }

    /// Create a producer event frame.
    #[must_use]
    pub fn event(kind: EventKind, data: Value) -> Self {
        match kind {
            EventKind::Sample => ClientFrame::Sample { data },
            EventKind::Aggregate => ClientFrame::Aggregate { data },
            EventKind::Screenshot => ClientFrame::Screenshot { data },
        }
    }

    /// Split a producer event frame into its kind and payload.
    #[must_use]
    pub fn as_event(&self) -> Option<(EventKind, &Value)> {
        match self {
            ClientFrame::Sample { data } => Some((EventKind::Sample, data)),
            ClientFrame::Aggregate { data } => Some((EventKind::Aggregate, data)),
            ClientFrame::Screenshot { data } => Some((EventKind::Screenshot, data)),
            _ => None,
        }
    }
}

fn channel_array<I, S>(channels: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Value::Array(
        channels
            .into_iter()
            .map(|c| Value::String(c.into()))
            .collect(),
    )
}

/// Payload of a producer event as delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerEvent {
    /// Event payload, with the sync-once field attached or stripped.
    pub data: Value,
    /// Device identifier of the producing connection.
    pub device: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

/// A frame sent by the relay to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Greeting carrying the address the relay recorded for the peer.
    #[serde(rename = "welcome")]
    Welcome { address: String },

    #[serde(rename = "pong")]
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        /// Unix timestamp in milliseconds.
        time: u64,
    },

    #[serde(rename = "connected")]
    Connected { subscribed: Vec<String> },

    #[serde(rename = "subscribed")]
    Subscribed { subscribed: Vec<String> },

    #[serde(rename = "unsubscribed")]
    Unsubscribed { subscribed: Vec<String> },

    #[serde(rename = "unsubscribed.all")]
    UnsubscribedAll,

    /// A channel broadcast delivered to a subscriber.
    #[serde(rename = "broadcast")]
    Broadcast {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        channel: String,
        /// Omitted when the sender supplied no data.
        #[serde(default, skip_serializing_if = "Value::is_null")]
        data: Value,
    },

    /// Post-operation state documents keyed by channel name.
    #[serde(rename = "state")]
    State {
        action: String,
        result: Map<String, Value>,
        #[serde(rename = "reqId", default, skip_serializing_if = "Option::is_none")]
        req_id: Option<Value>,
    },

    #[serde(rename = "error")]
    Error { reason: ErrorReason },

    #[serde(rename = "auth_ok")]
    AuthOk { device: Option<String> },

    #[serde(rename = "auth_failed")]
    AuthFailed,

    #[serde(rename = "sample")]
    Sample(ProducerEvent),

    #[serde(rename = "aggregate")]
    Aggregate(ProducerEvent),

    #[serde(rename = "screenshot")]
    Screenshot(ProducerEvent),

    /// A producer device went away.
    #[serde(rename = "offline")]
    Offline { device: String, timestamp: u64 },
}

impl ServerFrame {
    /// Create an error frame.
    #[must_use]
    pub fn error(reason: ErrorReason) -> Self {
        ServerFrame::Error { reason }
    }

    /// Create a producer event frame.
    #[must_use]
    pub fn event(kind: EventKind, event: ProducerEvent) -> Self {
        match kind {
            EventKind::Sample => ServerFrame::Sample(event),
            EventKind::Aggregate => ServerFrame::Aggregate(event),
            EventKind::Screenshot => ServerFrame::Screenshot(event),
        }
    }
}
