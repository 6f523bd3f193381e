//! Producer bookkeeping.
//!
//! Tracks which connection currently holds each producer device slot and the
//! last known value of the sync-once field per device.

use crate::connection::ConnectionId;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Default name of the sync-once field inside producer payloads.
pub const DEFAULT_SYNC_FIELD: &str = "icon";

/// Check a producer credential against the configured password.
///
/// With no password configured every attempt fails.
#[must_use]
pub fn verify_password(configured: Option<&str>, supplied: Option<&str>) -> bool {
    match (configured, supplied) {
        (Some(expected), Some(given)) => {
            expected.len() == given.len()
                && expected
                    .bytes()
                    .zip(given.bytes())
                    .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                    == 0
        }
        _ => false,
    }
}

/// Authenticated producer devices.
///
/// A device has at most one session; a later authentication from another
/// connection takes the slot over.
#[derive(Debug, Default)]
pub struct ProducerRegistry {
    devices: HashMap<String, ConnectionId>,
}

impl ProducerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Give the device slot to `connection`.
    ///
    /// Returns the connection that held it before, if any.
    pub fn claim(&mut self, device: &str, connection: ConnectionId) -> Option<ConnectionId> {
        let previous = self.devices.insert(device.to_string(), connection);
        if let Some(prev) = previous.filter(|prev| *prev != connection) {
            debug!(device = %device, previous = %prev, connection = %connection, "Producer slot taken over");
        }
        previous
    }

    /// Release the device slot if `connection` still holds it.
    pub fn release(&mut self, device: &str, connection: ConnectionId) -> bool {
        if self.devices.get(device) == Some(&connection) {
            self.devices.remove(device);
            true
        } else {
            false
        }
    }

    /// Connection currently holding the device slot.
    #[must_use]
    pub fn connection_for(&self, device: &str) -> Option<ConnectionId> {
        self.devices.get(device).copied()
    }

    /// Authenticated device identifiers.
    #[must_use]
    pub fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.devices.keys().cloned().collect();
        devices.sort();
        devices
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Last known sync-once value per producing device.
///
/// The field is stripped from every live payload and re-attached only on the
/// first delivery to each receiving connection, from this cache. The value a
/// receiver gets may therefore be older than the event it rides on.
#[derive(Debug)]
pub struct SyncCache {
    field: String,
    last: HashMap<String, Value>,
}

impl SyncCache {
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            last: HashMap::new(),
        }
    }

    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Record the field's value from an outgoing payload and strip it.
    pub fn observe(&mut self, device: &str, data: &mut Value) {
        let Some(object) = data.as_object_mut() else {
            return;
        };
        if let Some(value) = object.remove(&self.field) {
            self.last.insert(device.to_string(), value);
        }
    }

    /// The payload with the cached field attached, if a value is known and
    /// the payload is an object.
    #[must_use]
    pub fn attach(&self, device: &str, data: &Value) -> Option<Value> {
        let value = self.last.get(device)?;
        let mut object = data.as_object()?.clone();
        object.insert(self.field.clone(), value.clone());
        Some(Value::Object(object))
    }

    /// Cached value for a device.
    #[must_use]
    pub fn last_value(&self, device: &str) -> Option<&Value> {
        self.last.get(device)
    }
}

impl Default for SyncCache {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_FIELD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verify_password() {
        assert!(verify_password(Some("secret"), Some("secret")));
        assert!(!verify_password(Some("secret"), Some("secreT")));
        assert!(!verify_password(Some("secret"), Some("secret2")));
        assert!(!verify_password(Some("secret"), None));
        assert!(!verify_password(None, Some("anything")));
    }

    #[test]
    fn test_claim_and_release() {
        let mut producers = ProducerRegistry::new();
        let first = ConnectionId::next();
        let second = ConnectionId::next();

        assert_eq!(producers.claim("desk", first), None);
        assert_eq!(producers.claim("desk", second), Some(first));
        assert_eq!(producers.connection_for("desk"), Some(second));

        // Stale session does not evict the current one
        assert!(!producers.release("desk", first));
        assert_eq!(producers.len(), 1);

        assert!(producers.release("desk", second));
        assert!(producers.is_empty());
    }

    #[test]
    fn test_sync_cache_strips_and_attaches() {
        let mut cache = SyncCache::default();
        let mut data = json!({"cpu": 10, "icon": "a.png"});
        cache.observe("desk", &mut data);

        assert_eq!(data, json!({"cpu": 10}));
        assert_eq!(cache.last_value("desk"), Some(&json!("a.png")));
        assert_eq!(
            cache.attach("desk", &data),
            Some(json!({"cpu": 10, "icon": "a.png"}))
        );
        assert_eq!(cache.attach("laptop", &data), None);
    }

    #[test]
    fn test_sync_cache_keeps_last_value_when_absent() {
        let mut cache = SyncCache::new("avatar");
        let mut first = json!({"avatar": 1});
        cache.observe("desk", &mut first);
        let mut second = json!({"x": 2});
        cache.observe("desk", &mut second);

        assert_eq!(cache.attach("desk", &second), Some(json!({"x": 2, "avatar": 1})));
    }

    #[test]
    fn test_sync_cache_ignores_non_objects() {
        let mut cache = SyncCache::default();
        let mut data = json!("raw");
        cache.observe("desk", &mut data);
        assert_eq!(data, json!("raw"));
        assert_eq!(cache.attach("desk", &data), None);
    }
}
