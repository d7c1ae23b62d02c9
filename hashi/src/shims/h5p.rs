//! `window.H5P` and `window.H5PIntegration`.
//!
//! The H5P runtime reports learning events as xAPI statements carrying its
//! own idea of the actor. [`H5pXApiAdapter`] sits between the runtime and
//! the xAPI shim and substitutes the session actor before forwarding.
//! Per-content user data (`contentUserData`) lives in this shim's state.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use super::xapi::XApiShim;
use crate::config::protocol::{EventKind, Namespace};
use crate::error::Result;
use crate::mediator::Mediator;
use crate::shim::{Shim, ShimCore};
use crate::window::{globals, ContentWindow};

const EVENTS: &[EventKind] = &[EventKind::StateUpdate];

/// `contentUserData`: sub-content id, then data type, to saved data.
type UserData = BTreeMap<String, BTreeMap<String, Value>>;

/// Forwards H5P runtime statements to the xAPI shim as the session actor.
#[derive(Clone)]
pub struct H5pXApiAdapter {
    xapi: Arc<XApiShim>,
}

impl H5pXApiAdapter {
    pub fn new(xapi: Arc<XApiShim>) -> Self {
        Self { xapi }
    }

    /// Send a statement raised by the H5P runtime.
    pub fn send(&self, mut statement: Value) -> Result<String> {
        if let Some(object) = statement.as_object_mut() {
            object.insert("actor".to_string(), self.xapi.actor());
        }
        self.xapi.send_statement(statement)
    }
}

pub struct H5pShim {
    core: ShimCore,
    adapter: H5pXApiAdapter,
    integration: RwLock<Option<Arc<Value>>>,
    user_data: RwLock<UserData>,
}

impl H5pShim {
    pub fn new(mediator: Arc<Mediator>, adapter: H5pXApiAdapter) -> Self {
        Self {
            core: ShimCore::new(Namespace::H5p, EVENTS, mediator),
            adapter,
            integration: RwLock::new(None),
            user_data: RwLock::new(UserData::new()),
        }
    }

    /// Use `integration` as `window.H5PIntegration` from the next
    /// initialization on.
    pub fn set_integration(&self, integration: Value) {
        *self.integration.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(integration));
    }

    pub fn integration(&self) -> Option<Arc<Value>> {
        self.integration
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Statement raised through `H5P.externalDispatcher`.
    pub fn trigger_xapi(&self, statement: Value) -> Result<String> {
        self.adapter.send(statement)
    }

    pub fn get_user_data(&self, sub_content_id: &str, data_type: &str) -> Option<Value> {
        let user_data = self.user_data.read().unwrap_or_else(|e| e.into_inner());
        user_data
            .get(sub_content_id)
            .and_then(|by_type| by_type.get(data_type))
            .cloned()
    }

    /// Save user data; `Value::Null` deletes it, as H5P does.
    pub fn set_user_data(&self, sub_content_id: &str, data_type: &str, data: Value) -> Result<()> {
        {
            let mut user_data = self.user_data.write().unwrap_or_else(|e| e.into_inner());
            if data.is_null() {
                if let Some(by_type) = user_data.get_mut(sub_content_id) {
                    by_type.remove(data_type);
                    if by_type.is_empty() {
                        user_data.remove(sub_content_id);
                    }
                }
            } else {
                user_data
                    .entry(sub_content_id.to_string())
                    .or_default()
                    .insert(data_type.to_string(), data);
            }
        }
        debug!(sub_content_id, data_type, "H5P user data saved");
        self.state_updated()
    }
}

impl Shim for H5pShim {
    fn core(&self) -> &ShimCore {
        &self.core
    }

    fn data(&self) -> Value {
        let user_data = self.user_data.read().unwrap_or_else(|e| e.into_inner());
        serde_json::to_value(&*user_data).unwrap_or_default()
    }

    fn apply_data(&self, data: Value) {
        let user_data = if data.is_null() {
            UserData::new()
        } else {
            serde_json::from_value(data).unwrap_or_else(|e| {
                warn!(error = %e, "Discarding unreadable H5P user data");
                UserData::new()
            })
        };
        *self.user_data.write().unwrap_or_else(|e| e.into_inner()) = user_data;
    }

    fn iframe_initialize(self: Arc<Self>, window: &ContentWindow) {
        if let Some(integration) = self.integration() {
            window.install(globals::H5P_INTEGRATION, integration);
        }
        window.install(globals::H5P, self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::config::{SessionConfig, XApiConfig};
    use crate::mediator::RecordingTransport;
    use serde_json::json;
    use std::time::Duration;
    use xapi::StatementFilter;

    fn h5p() -> (Arc<XApiShim>, Arc<H5pShim>) {
        let transport = Arc::new(RecordingTransport::new());
        let mediator = Arc::new(Mediator::new(transport, Duration::from_secs(1)));
        let session = SessionConfig {
            user_id: Some("learner".into()),
            ..Default::default()
        };
        let xapi = Arc::new(XApiShim::new(
            mediator.clone(),
            Arc::new(VirtualClock::new()),
            &XApiConfig::default(),
            &session,
        ));
        let h5p = Arc::new(H5pShim::new(mediator, H5pXApiAdapter::new(xapi.clone())));
        (xapi, h5p)
    }

    #[test]
    fn test_runtime_actor_is_replaced() {
        let (xapi, h5p) = h5p();
        h5p.trigger_xapi(json!({
            "actor": {"name": "H5P anonymous", "mbox": "mailto:anon@h5p.org"},
            "verb": {"id": "http://adlnet.gov/expapi/verbs/attempted"},
            "object": {"id": "http://example.com/h5p/1"}
        }))
        .unwrap();

        let stored = xapi.get_statements(&StatementFilter::default()).unwrap();
        assert_eq!(stored[0]["actor"]["mbox"], "mailto:learner@hashi.xapi");
    }

    #[test]
    fn test_user_data() {
        let (_, h5p) = h5p();
        h5p.set_user_data("0", "state", json!("{\"answers\":[1]}")).unwrap();
        assert_eq!(h5p.get_user_data("0", "state"), Some(json!("{\"answers\":[1]}")));
        assert_eq!(h5p.data(), json!({"0": {"state": "{\"answers\":[1]}"}}));

        h5p.set_user_data("0", "state", Value::Null).unwrap();
        assert_eq!(h5p.data(), json!({}));
    }

    #[test]
    fn test_globals_installed() {
        let (_, h5p) = h5p();
        h5p.set_integration(json!({"contents": {}}));
        let window = ContentWindow::new();
        h5p.clone().iframe_initialize(&window);
        assert!(window.get::<H5pShim>(globals::H5P).is_some());
        assert_eq!(
            window.get::<Value>(globals::H5P_INTEGRATION).as_deref(),
            Some(&json!({"contents": {}}))
        );
    }
}
