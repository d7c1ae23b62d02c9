//! State, activity profile and agent profile documents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::agent_identifier;

/// Which document collection a document lives in.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentScope {
    /// Learner state for one activity, optionally per registration.
    State {
        activity_id: String,
        agent: Value,
        registration: Option<String>,
    },
    ActivityProfile {
        activity_id: String,
    },
    AgentProfile {
        agent: Value,
    },
}

impl DocumentScope {
    fn prefix(&self) -> String {
        match self {
            DocumentScope::State {
                activity_id,
                agent,
                registration,
            } => format!(
                "state|{}|{}|{}|",
                activity_id,
                agent_identifier(agent),
                registration.as_deref().unwrap_or_default()
            ),
            DocumentScope::ActivityProfile { activity_id } => {
                format!("activity|{}|", activity_id)
            }
            DocumentScope::AgentProfile { agent } => format!("agent|{}|", agent_identifier(agent)),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix(), id)
    }
}

/// A stored document and when it was last written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub stored: DateTime<Utc>,
    pub value: Value,
}

/// Flat keyed store of every document in a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentStore {
    documents: BTreeMap<String, Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope: &DocumentScope, id: &str) -> Option<&Value> {
        self.documents.get(&scope.key(id)).map(|doc| &doc.value)
    }

    pub fn set(&mut self, scope: &DocumentScope, id: &str, value: Value, now: DateTime<Utc>) {
        self.documents
            .insert(scope.key(id), Document { stored: now, value });
    }

    /// Remove a document, returning whether it existed.
    pub fn delete(&mut self, scope: &DocumentScope, id: &str) -> bool {
        self.documents.remove(&scope.key(id)).is_some()
    }

    /// Ids of documents in `scope` stored strictly after `since` (all of
    /// them when `since` is `None`).
    pub fn ids(&self, scope: &DocumentScope, since: Option<DateTime<Utc>>) -> Vec<String> {
        let prefix = scope.prefix();
        self.documents
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(_, doc)| since.map(|s| doc.stored > s).unwrap_or(true))
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
