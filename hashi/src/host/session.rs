//! Session store
//!
//! The host's persisted copy of every shim's state, indexed by namespace.
//! Written on each `StateUpdate` from the frame and replayed into the frame
//! when it reports ready.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::protocol::Namespace;

#[derive(Debug, Default)]
pub struct SessionStore {
    entries: DashMap<Namespace, Value>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store saved with [`to_json`](Self::to_json). Unknown
    /// namespaces are skipped.
    pub fn from_json(saved: &Value) -> Self {
        let store = Self::new();
        if let Some(map) = saved.as_object() {
            for (key, data) in map {
                match serde_json::from_value::<Namespace>(Value::String(key.clone())) {
                    Ok(namespace) => store.set(namespace, data.clone()),
                    Err(_) => warn!(namespace = %key, "Skipping unknown namespace in saved session"),
                }
            }
        }
        store
    }

    pub fn get(&self, namespace: Namespace) -> Option<Value> {
        self.entries.get(&namespace).map(|data| data.clone())
    }

    /// Replace the state held for `namespace`.
    pub fn set(&self, namespace: Namespace, data: Value) {
        debug!(namespace = %namespace, "Session state stored");
        self.entries.insert(namespace, data);
    }

    pub fn remove(&self, namespace: Namespace) -> Option<Value> {
        self.entries.remove(&namespace).map(|(_, data)| data)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, ordered by namespace.
    pub fn entries(&self) -> BTreeMap<Namespace, Value> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Everything stored, keyed by wire namespace name.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .entries()
            .into_iter()
            .map(|(namespace, data)| (namespace.as_str().to_string(), data))
            .collect();
        Value::Object(map)
    }
}
