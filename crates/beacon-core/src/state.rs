//! Per-channel state documents.
//!
//! Each channel name maps to a JSON object that peers can merge into, prune
//! and read. Documents are created lazily on first access and live
//! independently of channel subscriptions.

use crate::channel::ChannelId;
use beacon_protocol::StateAction;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::trace;

/// A channel state document.
pub type Document = Map<String, Value>;

/// Store of channel state documents.
#[derive(Debug, Default)]
pub struct StateStore {
    documents: DashMap<ChannelId, Document>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an action to every named channel.
    ///
    /// Returns the post-operation document of every named channel, keyed by
    /// channel name.
    pub fn apply(&self, action: StateAction, names: &[ChannelId], data: &Value) -> Document {
        match action {
            StateAction::Add => self.merge(names, data),
            StateAction::Remove => self.remove(names, data),
            StateAction::Get => self.get(names),
        }
    }

    /// Read the documents of the named channels.
    pub fn get(&self, names: &[ChannelId]) -> Document {
        self.for_each(names, |_| {})
    }

    /// Shallow-merge `partial` into each named document.
    ///
    /// A non-object `partial` merges nothing.
    pub fn merge(&self, names: &[ChannelId], partial: &Value) -> Document {
        let fields = partial.as_object();
        self.for_each(names, |doc| {
            if let Some(fields) = fields {
                for (key, value) in fields {
                    doc.insert(key.clone(), value.clone());
                }
            }
        })
    }

    /// Remove the listed keys from each named document.
    ///
    /// `keys` must be an array; string entries are removed, anything else is
    /// ignored.
    pub fn remove(&self, names: &[ChannelId], keys: &Value) -> Document {
        let keys: Vec<&str> = keys
            .as_array()
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        self.for_each(names, |doc| {
            for key in &keys {
                doc.remove(*key);
            }
        })
    }

    fn for_each(&self, names: &[ChannelId], mut op: impl FnMut(&mut Document)) -> Document {
        let mut result = Document::new();
        for name in names {
            let mut doc = self.documents.entry(name.clone()).or_default();
            op(doc.value_mut());
            result.insert(name.clone(), Value::Object(doc.value().clone()));
        }
        trace!(channels = names.len(), "State operation");
        result
    }

    /// Number of documents held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<ChannelId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_merge_keeps_untouched_keys() {
        let store = StateStore::new();
        store.merge(&names(&["cfg"]), &json!({"a": 1, "b": 2}));
        let result = store.merge(&names(&["cfg"]), &json!({"b": 3, "c": 4}));
        assert_eq!(result["cfg"], json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_merge_rejects_non_object() {
        let store = StateStore::new();
        store.merge(&names(&["cfg"]), &json!({"a": 1}));
        let result = store.merge(&names(&["cfg"]), &json!([1, 2]));
        assert_eq!(result["cfg"], json!({"a": 1}));
    }

    #[test]
    fn test_remove_only_listed_keys() {
        let store = StateStore::new();
        store.merge(&names(&["cfg"]), &json!({"a": 1, "b": 2, "c": 3}));
        let result = store.remove(&names(&["cfg"]), &json!(["a", "c", "missing"]));
        assert_eq!(result["cfg"], json!({"b": 2}));

        let result = store.remove(&names(&["cfg"]), &json!("b"));
        assert_eq!(result["cfg"], json!({"b": 2}));
    }

    #[test]
    fn test_get_is_idempotent_and_lazy() {
        let store = StateStore::new();
        let first = store.get(&names(&["fresh"]));
        let second = store.get(&names(&["fresh"]));
        assert_eq!(first, second);
        assert_eq!(first["fresh"], json!({}));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_multi_channel_apply() {
        let store = StateStore::new();
        let result = store.apply(StateAction::Add, &names(&["x", "y"]), &json!({"k": true}));
        assert_eq!(result.len(), 2);
        assert_eq!(result["x"], json!({"k": true}));
        assert_eq!(result["y"], json!({"k": true}));
    }

    #[test]
    fn test_add_then_remove_leaves_empty_document() {
        let store = StateStore::new();
        store.apply(StateAction::Add, &names(&["cfg"]), &json!({"k": 1}));
        store.apply(StateAction::Remove, &names(&["cfg"]), &json!(["k"]));
        let result = store.apply(StateAction::Get, &names(&["cfg"]), &Value::Null);
        assert_eq!(result["cfg"], json!({}));
    }
}
