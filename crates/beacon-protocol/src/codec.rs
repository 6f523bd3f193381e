//! Codec for encoding and decoding Beacon frames.
//!
//! Frames travel as JSON text, one object per WebSocket message.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::frames::{ClientFrame, ErrorReason};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// The text is not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// The frame has no `type` or an unrecognized one.
    #[error("Unknown frame type: {0:?}")]
    UnknownType(Option<String>),

    /// A known frame type with wrong-shaped fields.
    #[error("Invalid frame: {0}")]
    Invalid(#[source] serde_json::Error),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// The error reason reported to the peer for this failure.
    #[must_use]
    pub fn reason(&self) -> ErrorReason {
        match self {
            ProtocolError::FrameTooLarge(_) => ErrorReason::FrameTooLarge,
            ProtocolError::InvalidJson(_) => ErrorReason::InvalidJson,
            ProtocolError::UnknownType(_) => ErrorReason::TypeUnknown,
            ProtocolError::Invalid(_) | ProtocolError::Encode(_) => ErrorReason::InvalidMessage,
        }
    }
}

/// Encode a frame to JSON text.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame).map_err(ProtocolError::Encode)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a client frame from JSON text.
///
/// Unparsable text, a missing or unknown `type`, and wrong-shaped fields are
/// reported as distinct errors so the relay can answer with the right reason.
///
/// # Errors
///
/// Returns an error if the text is too large, not JSON, or not a known frame.
pub fn decode(text: &str) -> Result<ClientFrame, ProtocolError> {
    decode_value(decode_json(text)?)
}

/// Parse JSON text without interpreting it as a frame.
///
/// # Errors
///
/// Returns an error if the text is too large or not JSON.
pub fn decode_json(text: &str) -> Result<Value, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    serde_json::from_str(text).map_err(ProtocolError::InvalidJson)
}

/// Interpret an already-parsed JSON value as a client frame.
///
/// # Errors
///
/// Returns an error if the value has no known `type` or wrong-shaped fields.
pub fn decode_value(value: Value) -> Result<ClientFrame, ProtocolError> {
    let frame_type = match value.get("type").and_then(Value::as_str) {
        Some(t) => t.to_string(),
        None => {
            return Err(ProtocolError::UnknownType(
                value.get("type").map(ToString::to_string),
            ))
        }
    };

    match serde_json::from_value(value) {
        Ok(ClientFrame::Unknown) => Err(ProtocolError::UnknownType(Some(frame_type))),
        Ok(frame) => Ok(frame),
        Err(e) => Err(ProtocolError::Invalid(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{EventKind, StateAction};
    use serde_json::json;

    #[test]
    fn test_decode_subscribe_forms() {
        let single = decode(r#"{"type":"subscribe","channel":"room1"}"#).unwrap();
        assert_eq!(
            single,
            ClientFrame::Subscribe {
                channel: Some(json!("room1"))
            }
        );

        let embedded = decode(r#"{"type":"subscribe","channel":"[\"a\",\"b\"]"}"#).unwrap();
        assert_eq!(
            embedded,
            ClientFrame::Subscribe {
                channel: Some(json!("[\"a\",\"b\"]"))
            }
        );

        let missing = decode(r#"{"type":"subscribe"}"#).unwrap();
        assert_eq!(missing, ClientFrame::Subscribe { channel: None });
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = decode("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
        assert_eq!(err.reason(), ErrorReason::InvalidJson);
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = decode(r#"{"type":"teleport"}"#).unwrap_err();
        assert_eq!(err.reason(), ErrorReason::TypeUnknown);

        let err = decode(r#"{"channel":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(None)));

        let err = decode(r#"[1,2,3]"#).unwrap_err();
        assert_eq!(err.reason(), ErrorReason::TypeUnknown);
    }

    #[test]
    fn test_decode_wrong_shape() {
        let err = decode(r#"{"type":"auth","password":5}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Invalid(_)));
        assert_eq!(err.reason(), ErrorReason::InvalidMessage);
    }

    #[test]
    fn test_decode_unsubscribe_all_and_events() {
        assert_eq!(
            decode(r#"{"type":"unsubscribe.all"}"#).unwrap(),
            ClientFrame::UnsubscribeAll
        );

        let frame = decode(r#"{"type":"sample","data":{"cpu":12}}"#).unwrap();
        assert_eq!(frame.as_event(), Some((EventKind::Sample, &json!({"cpu": 12}))));
    }

    #[test]
    fn test_state_request_id_on_the_wire() {
        let frame = ClientFrame::state("cfg", StateAction::Get, Value::Null, Some(7));
        let text = encode(&frame).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "state", "channel": "cfg", "action": "get", "reqId": 7})
        );
        assert_eq!(decode(&text).unwrap(), frame);
    }

    #[test]
    fn test_frame_too_large() {
        let big = "x".repeat(MAX_FRAME_SIZE + 1);
        match decode(&big) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }
}
