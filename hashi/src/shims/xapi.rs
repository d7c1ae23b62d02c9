//! `window.xAPI`: statements, documents and progress for the session.
//!
//! Statements sent from the frame get the session actor and a timestamp
//! when they lack them, are validated, then stored newest first. With
//! compression on, the session actor and the content's own activity are
//! stripped before storage and restored on read. Verbs listed in
//! `xapi.debounced_verbs` are rate limited per verb.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use xapi::store::{format_timestamp, same_agent};
use xapi::{
    calculate_progress, DocumentScope, DocumentStore, SchemaKind, StatementFilter,
    StatementStore,
};

use crate::clock::VirtualClock;
use crate::config::protocol::{EventKind, Namespace};
use crate::config::{SessionConfig, XApiConfig};
use crate::debounce::Debouncer;
use crate::error::Result;
use crate::mediator::Mediator;
use crate::shim::{Shim, ShimCore};
use crate::window::{globals, ContentWindow};

const EVENTS: &[EventKind] = &[EventKind::StateUpdate, EventKind::UserDataUpdate];

/// Domain of the mailbox the default actor is derived under.
pub const ACTOR_DOMAIN: &str = "hashi.xapi";

/// Prefix of the activity IRI a content node is known by.
pub const ACTIVITY_PREFIX: &str = "https://hashi.xapi/content/";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct XApiState {
    statements: StatementStore,
    documents: DocumentStore,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Learner {
    user_id: Option<String>,
    user_name: Option<String>,
}

pub struct XApiShim {
    core: ShimCore,
    clock: Arc<VirtualClock>,
    config: XApiConfig,
    activity_id: Option<String>,
    learner: RwLock<Learner>,
    state: RwLock<XApiState>,
    debouncer: Mutex<Debouncer<String, Value>>,
}

impl XApiShim {
    pub fn new(
        mediator: Arc<Mediator>,
        clock: Arc<VirtualClock>,
        config: &XApiConfig,
        session: &SessionConfig,
    ) -> Self {
        Self {
            core: ShimCore::new(Namespace::XApi, EVENTS, mediator),
            clock,
            config: config.clone(),
            activity_id: session
                .content_id
                .as_ref()
                .map(|id| format!("{}{}", ACTIVITY_PREFIX, id)),
            learner: RwLock::new(Learner {
                user_id: session.user_id.clone(),
                user_name: session.user_name.clone(),
            }),
            state: RwLock::new(XApiState::default()),
            debouncer: Mutex::new(Debouncer::new(config.debounce(), config.max_wait())),
        }
    }

    /// The Agent statements default to, derived from the session user.
    pub fn actor(&self) -> Value {
        let learner = self.learner.read().unwrap_or_else(|e| e.into_inner());
        let id = learner.user_id.as_deref().unwrap_or("anonymous");
        let mut actor = json!({
            "objectType": "Agent",
            "mbox": format!("mailto:{}@{}", id, ACTOR_DOMAIN),
        });
        if let Some(name) = &learner.user_name {
            actor["name"] = Value::String(name.clone());
        }
        actor
    }

    /// IRI of the content's own activity, when the session names a content node.
    pub fn activity_id(&self) -> Option<&str> {
        self.activity_id.as_deref()
    }

    fn own_activity(&self) -> Option<Value> {
        self.activity_id
            .as_ref()
            .map(|id| json!({"objectType": "Activity", "id": id}))
    }

    /// Fill in defaults and validate.
    fn prepare(&self, mut statement: Value) -> Result<Value> {
        if let Some(object) = statement.as_object_mut() {
            if !object.contains_key("actor") {
                object.insert("actor".to_string(), self.actor());
            }
            if !object.contains_key("object") {
                if let Some(activity) = self.own_activity() {
                    object.insert("object".to_string(), activity);
                }
            }
            if !object.contains_key("timestamp") {
                object.insert(
                    "timestamp".to_string(),
                    Value::String(format_timestamp(self.clock.now())),
                );
            }
        }
        SchemaKind::Statement.clean(statement).map_err(|e| {
            warn!(error = %e, "Rejected statement");
            e.into()
        })
    }

    fn compress(&self, mut statement: Value) -> Value {
        if !self.config.compress {
            return statement;
        }
        let actor = self.actor();
        if let Some(object) = statement.as_object_mut() {
            if object.get("actor").map(|a| same_agent(a, &actor)).unwrap_or(false) {
                object.remove("actor");
            }
            object.remove("authority");
            let is_own_activity = match (object.get("object"), &self.activity_id) {
                (Some(target), Some(own)) => {
                    matches!(
                        target.get("objectType").and_then(Value::as_str),
                        None | Some("Activity")
                    ) && target.get("id").and_then(Value::as_str) == Some(own.as_str())
                        && target.get("definition").is_none()
                }
                _ => false,
            };
            if is_own_activity {
                object.remove("object");
            }
        }
        statement
    }

    fn decompress(&self, mut statement: Value) -> Value {
        if let Some(object) = statement.as_object_mut() {
            if !object.contains_key("actor") {
                object.insert("actor".to_string(), self.actor());
            }
            if !object.contains_key("object") {
                if let Some(activity) = self.own_activity() {
                    object.insert("object".to_string(), activity);
                }
            }
        }
        statement
    }

    fn is_debounced(&self, statement: &Value) -> bool {
        statement
            .pointer("/verb/id")
            .and_then(Value::as_str)
            .and_then(|id| id.rsplit('/').next())
            .map(|verb| self.config.debounced_verbs.iter().any(|v| v == verb))
            .unwrap_or(false)
    }

    fn store(&self, statements: Vec<Value>) -> Result<Vec<String>> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        let compressed = statements.into_iter().map(|s| self.compress(s)).collect();
        let ids = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.statements.store(compressed, self.clock.now())
        };
        self.state_updated()?;
        Ok(ids)
    }

    /// Validate and store one statement. Returns its id.
    ///
    /// A statement whose verb is rate limited may be held back and stored
    /// later by [`flush_debounced`](Self::flush_debounced). A held statement
    /// is superseded by the next one with the same verb inside the window,
    /// so the id returned for it may never appear in the store.
    pub fn send_statement(&self, statement: Value) -> Result<String> {
        let statement = self.prepare(statement)?;
        let id = statement
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let now = Instant::now();
        let ready = {
            let mut debouncer = self.debouncer.lock().unwrap_or_else(|e| e.into_inner());
            let mut ready = debouncer.due(now);
            if self.is_debounced(&statement) {
                let key = statement
                    .pointer("/verb/id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let released = debouncer.offer(key, statement, now);
                if released.is_empty() {
                    debug!(id = %id, "Statement held back by debounce");
                }
                ready.extend(released);
            } else {
                ready.push(statement);
            }
            ready
        };
        self.store(ready)?;
        Ok(id)
    }

    /// Validate every statement, then store them together. Nothing is stored
    /// if any statement is invalid.
    pub fn send_statements(&self, statements: Vec<Value>) -> Result<Vec<String>> {
        let prepared = statements
            .into_iter()
            .map(|s| self.prepare(s))
            .collect::<Result<Vec<_>>>()?;
        self.store(prepared)
    }

    /// Store held-back statements whose debounce window has closed.
    pub fn flush_debounced(&self) -> Result<usize> {
        let due = self
            .debouncer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .due(Instant::now());
        let count = due.len();
        self.store(due)?;
        Ok(count)
    }

    /// Store every held-back statement now.
    pub fn drain_debounced(&self) -> Result<usize> {
        let held = self
            .debouncer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain();
        let count = held.len();
        self.store(held)?;
        Ok(count)
    }

    /// Query stored statements. Results carry the session actor and the
    /// content's own activity even when stored compressed.
    pub fn get_statements(&self, filter: &StatementFilter) -> Option<Vec<Value>> {
        let expanded = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            StatementStore::from_statements(
                state
                    .statements
                    .iter()
                    .map(|s| self.decompress(s.clone()))
                    .collect(),
            )
        };
        expanded.query(filter, &self.actor())
    }

    pub fn statement_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .statements
            .len()
    }

    /// Progress implied by stored statements, if any.
    pub fn progress(&self) -> Option<f64> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        calculate_progress(state.statements.iter())
    }

    /// Scope for the session learner's state on an activity.
    pub fn state_scope(&self, activity_id: impl Into<String>, registration: Option<String>) -> DocumentScope {
        DocumentScope::State {
            activity_id: activity_id.into(),
            agent: self.actor(),
            registration,
        }
    }

    pub fn activity_profile_scope(&self, activity_id: impl Into<String>) -> DocumentScope {
        DocumentScope::ActivityProfile {
            activity_id: activity_id.into(),
        }
    }

    /// Scope for the session learner's agent profile.
    pub fn agent_profile_scope(&self) -> DocumentScope {
        DocumentScope::AgentProfile { agent: self.actor() }
    }

    pub fn get_document(&self, scope: &DocumentScope, id: &str) -> Option<Value> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.documents.get(scope, id).cloned()
    }

    pub fn set_document(&self, scope: &DocumentScope, id: &str, value: Value) -> Result<()> {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.documents.set(scope, id, value, self.clock.now());
        }
        self.state_updated()
    }

    pub fn delete_document(&self, scope: &DocumentScope, id: &str) -> Result<bool> {
        let removed = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.documents.delete(scope, id)
        };
        if removed {
            self.state_updated()?;
        }
        Ok(removed)
    }

    pub fn document_ids(
        &self,
        scope: &DocumentScope,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.documents.ids(scope, since)
    }

    /// Take the learner's identity from a `UserDataUpdate` message.
    ///
    /// Statements stored without an actor belong to the previous learner;
    /// they get that actor written back before the identity changes.
    pub fn handle_user_data(&self, data: &Value) -> Result<()> {
        let previous_actor = self.actor();
        let changed = {
            let mut learner = self.learner.write().unwrap_or_else(|e| e.into_inner());
            let before = learner.clone();
            if let Some(id) = data.get("userId").and_then(Value::as_str) {
                learner.user_id = Some(id.to_string());
            }
            if let Some(name) = data.get("userName").and_then(Value::as_str) {
                learner.user_name = Some(name.to_string());
            }
            info!(user_id = ?learner.user_id, "xAPI learner updated");
            *learner != before
        };
        if !changed {
            return Ok(());
        }

        let attributed = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let mut attributed = 0;
            let statements = state
                .statements
                .iter()
                .cloned()
                .map(|mut statement| {
                    if let Some(object) = statement.as_object_mut() {
                        if !object.contains_key("actor") {
                            object.insert("actor".to_string(), previous_actor.clone());
                            attributed += 1;
                        }
                    }
                    statement
                })
                .collect();
            state.statements = StatementStore::from_statements(statements);
            attributed
        };
        if attributed > 0 {
            debug!(attributed, "Kept previous learner on stored statements");
            self.state_updated()?;
        }
        Ok(())
    }
}

impl Shim for XApiShim {
    fn core(&self) -> &ShimCore {
        &self.core
    }

    fn data(&self) -> Value {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        serde_json::to_value(&*state).unwrap_or_default()
    }

    fn apply_data(&self, data: Value) {
        let state = if data.is_null() {
            XApiState::default()
        } else {
            serde_json::from_value(data).unwrap_or_else(|e| {
                warn!(error = %e, "Discarding unreadable xAPI state");
                XApiState::default()
            })
        };
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn iframe_initialize(self: Arc<Self>, window: &ContentWindow) {
        window.install(globals::XAPI, self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediator::RecordingTransport;
    use std::time::Duration;

    fn shim(config: XApiConfig) -> (Arc<RecordingTransport>, XApiShim) {
        let transport = Arc::new(RecordingTransport::new());
        let mediator = Arc::new(Mediator::new(transport.clone(), Duration::from_secs(1)));
        let session = SessionConfig {
            user_id: Some("learner".into()),
            content_id: Some("abc123".into()),
            ..Default::default()
        };
        let shim = XApiShim::new(mediator, Arc::new(VirtualClock::new()), &config, &session);
        (transport, shim)
    }

    fn verb(name: &str) -> Value {
        json!({"id": format!("http://adlnet.gov/expapi/verbs/{}", name)})
    }

    #[test]
    fn test_defaults_are_attached() {
        let (transport, xapi) = shim(XApiConfig::default());
        let id = xapi.send_statement(json!({"verb": verb("experienced")})).unwrap();

        let stored = xapi.get_statements(&StatementFilter::default()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["id"], json!(id));
        assert_eq!(stored[0]["actor"]["mbox"], "mailto:learner@hashi.xapi");
        assert_eq!(stored[0]["object"]["id"], "https://hashi.xapi/content/abc123");
        assert!(stored[0]["timestamp"].is_string());
        assert_eq!(transport.matching(Namespace::XApi, EventKind::StateUpdate).len(), 1);
    }

    #[test]
    fn test_compression_strips_session_fields() {
        let (_, xapi) = shim(XApiConfig::default());
        xapi.send_statement(json!({"verb": verb("experienced")})).unwrap();
        let raw = &xapi.data()["statements"][0];
        assert!(raw.get("actor").is_none());
        assert!(raw.get("object").is_none());

        let (_, plain) = shim(XApiConfig {
            compress: false,
            ..Default::default()
        });
        plain.send_statement(json!({"verb": verb("experienced")})).unwrap();
        assert!(plain.data()["statements"][0].get("actor").is_some());
    }

    #[test]
    fn test_invalid_statement_is_not_stored() {
        let (transport, xapi) = shim(XApiConfig::default());
        let err = xapi
            .send_statement(json!({"verb": {"id": "not an iri"}}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid statement: in verb: id must be a valid IRI");
        assert_eq!(xapi.statement_count(), 0);
        assert!(transport.messages().is_empty());
    }

    #[test]
    fn test_high_frequency_verbs_coalesce() {
        let (_, xapi) = shim(XApiConfig::default());
        for _ in 0..3 {
            xapi.send_statement(json!({"verb": verb("answered")})).unwrap();
        }
        assert_eq!(xapi.statement_count(), 1);

        xapi.send_statement(json!({"verb": verb("experienced")})).unwrap();
        assert_eq!(xapi.statement_count(), 2);

        assert_eq!(xapi.drain_debounced().unwrap(), 1);
        assert_eq!(xapi.statement_count(), 3);
    }

    #[test]
    fn test_superseded_statement_is_never_stored() {
        let (_, xapi) = shim(XApiConfig::default());
        xapi.send_statement(json!({"verb": verb("answered")})).unwrap();
        let superseded = xapi.send_statement(json!({"verb": verb("answered")})).unwrap();
        let last = xapi.send_statement(json!({"verb": verb("answered")})).unwrap();
        xapi.drain_debounced().unwrap();

        let ids: Vec<Value> = xapi
            .get_statements(&StatementFilter::default())
            .unwrap()
            .into_iter()
            .map(|s| s["id"].clone())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&json!(last)));
        assert!(!ids.contains(&json!(superseded)));
    }

    #[test]
    fn test_learner_change_keeps_earlier_actor() {
        let (_, xapi) = shim(XApiConfig::default());
        xapi.send_statement(json!({"verb": verb("experienced")})).unwrap();
        assert!(xapi.data()["statements"][0].get("actor").is_none());

        xapi.handle_user_data(&json!({"userId": "someone-else"})).unwrap();
        xapi.send_statement(json!({"verb": verb("completed")})).unwrap();

        let stored = xapi.get_statements(&StatementFilter::default()).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0]["actor"]["mbox"], "mailto:someone-else@hashi.xapi");
        assert_eq!(stored[1]["actor"]["mbox"], "mailto:learner@hashi.xapi");

        let raw = xapi.data();
        assert_eq!(
            raw["statements"][1]["actor"]["mbox"],
            "mailto:learner@hashi.xapi"
        );
        assert!(raw["statements"][0].get("actor").is_none());
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let (_, xapi) = shim(XApiConfig::default());
        let result = xapi.send_statements(vec![
            json!({"verb": verb("experienced")}),
            json!({"verb": verb("experienced"), "timestamp": "yesterday"}),
        ]);
        assert!(result.is_err());
        assert_eq!(xapi.statement_count(), 0);
    }

    #[test]
    fn test_progress_and_documents() {
        let (_, xapi) = shim(XApiConfig::default());
        assert_eq!(xapi.progress(), None);
        xapi.send_statement(json!({
            "verb": verb("scored"),
            "result": {"score": {"raw": 5, "min": 0, "max": 10}}
        }))
        .unwrap();
        assert_eq!(xapi.progress(), Some(0.5));

        let scope = xapi.state_scope("https://hashi.xapi/content/abc123", None);
        xapi.set_document(&scope, "bookmark", json!({"page": 2})).unwrap();
        assert_eq!(xapi.get_document(&scope, "bookmark"), Some(json!({"page": 2})));
        assert_eq!(xapi.document_ids(&scope, None), vec!["bookmark"]);
        assert!(xapi.delete_document(&scope, "bookmark").unwrap());
    }

    #[test]
    fn test_state_survives_rehydration() {
        let (_, xapi) = shim(XApiConfig::default());
        xapi.send_statement(json!({"verb": verb("completed")})).unwrap();
        let saved = xapi.data();

        let (_, restored) = shim(XApiConfig::default());
        restored.apply_data(saved);
        assert_eq!(restored.statement_count(), 1);
        assert_eq!(restored.progress(), Some(1.0));
    }
}
