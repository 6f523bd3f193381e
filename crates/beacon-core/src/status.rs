//! Status publishing seam.
//!
//! When a designated producer device emits an event, the hub hands a
//! [`StatusUpdate`] to a [`StatusPublisher`] on a detached task. Publish
//! failures are logged and never reach the routing path.

use async_trait::async_trait;
use beacon_protocol::EventKind;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// One status line for an external status service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub label: String,
    pub text: String,
}

impl StatusUpdate {
    /// Build the update for a producer event.
    #[must_use]
    pub fn from_event(kind: EventKind, data: &Value) -> Self {
        let text = match data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            label: kind.as_str().to_string(),
            text,
        }
    }
}

/// Status publish errors.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Status publish failed: {0}")]
    Failed(String),
}

/// Publishes status updates to an external service.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Publish one update.
    async fn publish(&self, update: StatusUpdate) -> Result<(), StatusError>;

    /// Publisher name for logs.
    fn name(&self) -> &'static str;
}

/// Publisher that writes updates to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusPublisher;

#[async_trait]
impl StatusPublisher for TracingStatusPublisher {
    async fn publish(&self, update: StatusUpdate) -> Result<(), StatusError> {
        info!(label = %update.label, text = %update.text, "Status update");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_from_event() {
        let update = StatusUpdate::from_event(EventKind::Sample, &json!("playing"));
        assert_eq!(update.label, "sample");
        assert_eq!(update.text, "playing");

        let update = StatusUpdate::from_event(EventKind::Aggregate, &json!({"n": 1}));
        assert_eq!(update.text, r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn test_tracing_publisher() {
        let publisher = TracingStatusPublisher;
        assert!(publisher
            .publish(StatusUpdate::from_event(EventKind::Sample, &json!(1)))
            .await
            .is_ok());
        assert_eq!(publisher.name(), "tracing");
    }
}
