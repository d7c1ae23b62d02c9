//! `localStorage` and `sessionStorage`.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tracing::trace;

use super::to_js_string;
use crate::config::protocol::{EventKind, Namespace};
use crate::error::Result;
use crate::mediator::Mediator;
use crate::shim::{Shim, ShimCore};
use crate::window::{globals, ContentWindow};

const EVENTS: &[EventKind] = &[EventKind::StateUpdate];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Persisted by the host across sessions
    Local,
    /// Lives only as long as the frame
    Session,
}

impl StorageKind {
    pub fn namespace(self) -> Namespace {
        match self {
            StorageKind::Local => Namespace::LocalStorage,
            StorageKind::Session => Namespace::SessionStorage,
        }
    }

    pub fn global_name(self) -> &'static str {
        match self {
            StorageKind::Local => globals::LOCAL_STORAGE,
            StorageKind::Session => globals::SESSION_STORAGE,
        }
    }
}

/// The Web Storage interface over string keys and string values.
pub struct StorageShim {
    core: ShimCore,
    kind: StorageKind,
    items: RwLock<BTreeMap<String, String>>,
}

impl StorageShim {
    pub fn new(kind: StorageKind, mediator: Arc<Mediator>) -> Self {
        Self {
            core: ShimCore::new(kind.namespace(), EVENTS, mediator),
            kind,
            items: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn length(&self) -> usize {
        self.items.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Name of the `index`th key.
    pub fn key(&self, index: usize) -> Option<String> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .nth(index)
            .cloned()
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Store `value` under `key`, converted to a string the way a browser
    /// would.
    pub fn set_item(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let value = to_js_string(&value.into());
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value);
        self.state_updated()
    }

    pub fn remove_item(&self, key: &str) -> Result<()> {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        self.state_updated()
    }

    pub fn clear(&self) -> Result<()> {
        self.items.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.state_updated()
    }
}

impl Shim for StorageShim {
    fn core(&self) -> &ShimCore {
        &self.core
    }

    fn data(&self) -> Value {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        Value::Object(
            items
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Map<String, Value>>(),
        )
    }

    fn apply_data(&self, data: Value) {
        let items = match data {
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| (k, to_js_string(&v)))
                .collect(),
            _ => BTreeMap::new(),
        };
        *self.items.write().unwrap_or_else(|e| e.into_inner()) = items;
    }

    fn iframe_initialize(self: Arc<Self>, window: &ContentWindow) {
        window.install(self.kind.global_name(), self);
    }

    fn state_updated(&self) -> Result<()> {
        if self.kind == StorageKind::Session {
            trace!("Session storage changes stay in the frame");
            return Ok(());
        }
        self.core.send(EventKind::StateUpdate, self.data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediator::RecordingTransport;
    use serde_json::json;
    use std::time::Duration;

    fn storage(kind: StorageKind) -> (Arc<RecordingTransport>, StorageShim) {
        let transport = Arc::new(RecordingTransport::new());
        let mediator = Arc::new(Mediator::new(transport.clone(), Duration::from_secs(1)));
        (transport, StorageShim::new(kind, mediator))
    }

    #[test]
    fn test_values_become_strings() {
        let (_, storage) = storage(StorageKind::Local);
        storage.set_item("k", 123).unwrap();
        assert_eq!(storage.get_item("k").as_deref(), Some("123"));
        storage.set_item("flag", true).unwrap();
        assert_eq!(storage.get_item("flag").as_deref(), Some("true"));
        storage.set_item("obj", json!({"a": 1})).unwrap();
        assert_eq!(storage.get_item("obj").as_deref(), Some("[object Object]"));
        storage.set_item("big", 1e20).unwrap();
        assert_eq!(storage.get_item("big").as_deref(), Some("100000000000000000000"));
        storage.set_item("tiny", 1e-7).unwrap();
        assert_eq!(storage.get_item("tiny").as_deref(), Some("1e-7"));
    }

    #[test]
    fn test_length_and_key_track_mutations() {
        let (_, storage) = storage(StorageKind::Local);
        storage.set_item("a", "1").unwrap();
        storage.set_item("b", "2").unwrap();
        assert_eq!(storage.length(), 2);
        assert_eq!(storage.key(1).as_deref(), Some("b"));

        storage.remove_item("a").unwrap();
        assert_eq!(storage.length(), 1);
        assert_eq!(storage.key(0).as_deref(), Some("b"));
        assert_eq!(storage.key(1), None);

        storage.clear().unwrap();
        assert_eq!(storage.length(), 0);
        assert_eq!(storage.get_item("b"), None);
    }

    #[test]
    fn test_local_mutations_push_state() {
        let (transport, storage) = storage(StorageKind::Local);
        storage.set_item("k", "v").unwrap();
        assert_eq!(
            transport.last().unwrap()["data"],
            json!({"k": "v"})
        );
    }

    #[test]
    fn test_session_storage_stays_local() {
        let (transport, storage) = storage(StorageKind::Session);
        storage.set_item("k", "v").unwrap();
        storage.set_data(json!({"other": 1})).unwrap();
        assert!(transport.messages().is_empty());
        assert_eq!(storage.get_item("other").as_deref(), Some("1"));
    }
}
