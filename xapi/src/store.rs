//! Newest-first statement store and the statement query engine.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// The ADL verb that voids the statement referenced by its object.
pub const VOIDED_VERB: &str = "http://adlnet.gov/expapi/verbs/voided";

/// Context activity lists searched by `related_activities`.
const CONTEXT_ACTIVITY_LISTS: &[&str] = &["parent", "grouping", "category", "other"];

/// Render a timestamp the way statements carry them.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Canonical string for an Agent or Group's inverse functional identifier.
///
/// Anonymous groups (no identifier) fall back to their JSON rendering.
pub fn agent_identifier(agent: &Value) -> String {
    for key in ["mbox", "mbox_sha1sum", "openid"] {
        if let Some(id) = agent.get(key).and_then(Value::as_str) {
            return format!("{}:{}", key, id);
        }
    }
    if let Some(account) = agent.get("account") {
        let home = account.get("homePage").and_then(Value::as_str).unwrap_or_default();
        let name = account.get("name").and_then(Value::as_str).unwrap_or_default();
        return format!("account:{}::{}", home, name);
    }
    agent.to_string()
}

/// Do two actors share an inverse functional identifier?
pub fn same_agent(a: &Value, b: &Value) -> bool {
    agent_identifier(a) == agent_identifier(b)
}

fn actor_matches(actor: Option<&Value>, agent: &Value) -> bool {
    match actor {
        None => false,
        Some(actor) => {
            same_agent(actor, agent)
                || actor
                    .get("member")
                    .and_then(Value::as_array)
                    .map(|members| members.iter().any(|m| same_agent(m, agent)))
                    .unwrap_or(false)
        }
    }
}

fn is_agent_like(value: &Value) -> bool {
    matches!(
        value.get("objectType").and_then(Value::as_str),
        Some("Agent") | Some("Group")
    )
}

fn is_activity(value: &Value) -> bool {
    matches!(
        value.get("objectType").and_then(Value::as_str),
        None | Some("Activity")
    )
}

/// Query parameters for [`StatementStore::query`], named as the xAPI
/// statements resource names them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatementFilter {
    pub statement_id: Option<String>,
    pub voided_statement_id: Option<String>,
    pub agent: Option<Value>,
    pub verb: Option<String>,
    pub activity: Option<String>,
    pub registration: Option<String>,
    #[serde(rename = "related_activities")]
    pub related_activities: bool,
    #[serde(rename = "related_agents")]
    pub related_agents: bool,
    /// Exclusive lower bound on `stored`
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `stored`
    pub until: Option<DateTime<Utc>>,
    /// Zero means no limit
    pub limit: usize,
    pub ascending: bool,
}

impl StatementFilter {
    fn matches_agent(&self, statement: &Value, agent: &Value) -> bool {
        if actor_matches(statement.get("actor"), agent) {
            return true;
        }
        let object = statement.get("object");
        if object.map(is_agent_like).unwrap_or(false) && actor_matches(object, agent) {
            return true;
        }
        if !self.related_agents {
            return false;
        }
        let context = statement.get("context");
        actor_matches(statement.get("authority"), agent)
            || actor_matches(context.and_then(|c| c.get("instructor")), agent)
            || actor_matches(context.and_then(|c| c.get("team")), agent)
            || object
                .filter(|o| o.get("objectType").and_then(Value::as_str) == Some("SubStatement"))
                .map(|sub| self.matches_agent(sub, agent))
                .unwrap_or(false)
    }

    fn matches_activity(&self, statement: &Value, activity: &str) -> bool {
        let object = statement.get("object");
        let direct = object
            .filter(|o| is_activity(o))
            .and_then(|o| o.get("id"))
            .and_then(Value::as_str)
            == Some(activity);
        if direct {
            return true;
        }
        if !self.related_activities {
            return false;
        }
        let in_context = statement
            .get("context")
            .and_then(|c| c.get("contextActivities"))
            .map(|lists| {
                CONTEXT_ACTIVITY_LISTS.iter().any(|list| {
                    lists
                        .get(*list)
                        .and_then(Value::as_array)
                        .map(|items| {
                            items
                                .iter()
                                .any(|a| a.get("id").and_then(Value::as_str) == Some(activity))
                        })
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);
        in_context
            || object
                .filter(|o| o.get("objectType").and_then(Value::as_str) == Some("SubStatement"))
                .map(|sub| self.matches_activity(sub, activity))
                .unwrap_or(false)
    }

    fn matches(&self, statement: &Value) -> bool {
        if let Some(agent) = &self.agent {
            if !self.matches_agent(statement, agent) {
                return false;
            }
        }
        if let Some(verb) = &self.verb {
            let id = statement.pointer("/verb/id").and_then(Value::as_str);
            if id != Some(verb.as_str()) {
                return false;
            }
        }
        if let Some(activity) = &self.activity {
            if !self.matches_activity(statement, activity) {
                return false;
            }
        }
        if let Some(registration) = &self.registration {
            let found = statement
                .pointer("/context/registration")
                .and_then(Value::as_str);
            if found != Some(registration.as_str()) {
                return false;
            }
        }
        if self.since.is_some() || self.until.is_some() {
            let stored = match parse_timestamp(statement.get("stored")) {
                Some(stored) => stored,
                None => return false,
            };
            if self.since.map(|since| stored <= since).unwrap_or(false) {
                return false;
            }
            if self.until.map(|until| stored > until).unwrap_or(false) {
                return false;
            }
        }
        true
    }
}

/// Append-only, newest-first list of stored statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementStore {
    statements: VecDeque<Value>,
}

impl StatementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a persisted newest-first list.
    pub fn from_statements(statements: Vec<Value>) -> Self {
        Self {
            statements: statements.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Every statement, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.statements.iter()
    }

    /// Store already-validated statements in the order given.
    ///
    /// Stamps `stored` (and `timestamp` when absent) with `now` and strips
    /// attachments, which are not persisted. The last statement given ends
    /// up at the front. Returns the stored ids.
    pub fn store(&mut self, statements: Vec<Value>, now: DateTime<Utc>) -> Vec<String> {
        let stamp = Value::String(format_timestamp(now));
        let mut ids = Vec::with_capacity(statements.len());
        for mut statement in statements {
            if let Some(object) = statement.as_object_mut() {
                object.insert("stored".to_string(), stamp.clone());
                object
                    .entry("timestamp".to_string())
                    .or_insert_with(|| stamp.clone());
                object.remove("attachments");
                if let Some(id) = object.get("id").and_then(Value::as_str) {
                    ids.push(id.to_string());
                }
            }
            self.statements.push_front(statement);
        }
        debug!(count = ids.len(), total = self.statements.len(), "Stored statements");
        ids
    }

    /// Ids of statements voided by a stored voiding statement.
    fn voided_ids(&self) -> HashSet<&str> {
        self.statements
            .iter()
            .filter(|s| s.pointer("/verb/id").and_then(Value::as_str) == Some(VOIDED_VERB))
            .filter_map(|s| s.get("object"))
            .filter(|o| o.get("objectType").and_then(Value::as_str) == Some("StatementRef"))
            .filter_map(|o| o.get("id").and_then(Value::as_str))
            .collect()
    }

    fn find(&self, id: &str) -> Option<&Value> {
        self.statements
            .iter()
            .find(|s| s.get("id").and_then(Value::as_str) == Some(id))
    }

    /// Run a statement query.
    ///
    /// Returns `None` when both `statementId` and `voidedStatementId` are
    /// given or when a lookup by id finds nothing. An `agent` filter without
    /// `related_agents` only ever answers for `session_actor`; any other
    /// agent yields no results.
    pub fn query(&self, filter: &StatementFilter, session_actor: &Value) -> Option<Vec<Value>> {
        let voided = self.voided_ids();

        match (&filter.statement_id, &filter.voided_statement_id) {
            (Some(_), Some(_)) => return None,
            (Some(id), None) => {
                if voided.contains(id.as_str()) {
                    return None;
                }
                return self.find(id).cloned().map(|s| vec![s]);
            }
            (None, Some(id)) => {
                if !voided.contains(id.as_str()) {
                    return None;
                }
                return self.find(id).cloned().map(|s| vec![s]);
            }
            (None, None) => {}
        }

        if let Some(agent) = &filter.agent {
            if !filter.related_agents && !same_agent(agent, session_actor) {
                debug!("Agent filter does not match the session actor");
                return Some(Vec::new());
            }
        }

        let mut found: Vec<Value> = self
            .statements
            .iter()
            .filter(|s| {
                let id = s.get("id").and_then(Value::as_str).unwrap_or_default();
                !voided.contains(id)
            })
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();

        if filter.ascending {
            found.reverse();
        }
        if filter.limit > 0 {
            found.truncate(filter.limit);
        }
        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn actor() -> Value {
        json!({"mbox": "mailto:learner@hashi.xapi"})
    }

    fn statement(id: &str, verb: &str, activity: &str) -> Value {
        json!({
            "id": id,
            "actor": actor(),
            "verb": {"id": verb},
            "object": {"id": activity}
        })
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_store_stamps_and_strips() {
        let mut store = StatementStore::new();
        let mut s = statement("a", "http://example.com/v", "http://example.com/a");
        s["attachments"] = json!([]);
        store.store(vec![s], at(0));

        let stored = store.iter().next().unwrap();
        assert_eq!(stored["stored"], json!(format_timestamp(at(0))));
        assert_eq!(stored["timestamp"], stored["stored"]);
        assert!(stored.get("attachments").is_none());
    }

    #[test]
    fn test_both_ids_is_none() {
        let store = StatementStore::new();
        let filter = StatementFilter {
            statement_id: Some("a".into()),
            voided_statement_id: Some("b".into()),
            ..Default::default()
        };
        assert_eq!(store.query(&filter, &actor()), None);
    }

    #[test]
    fn test_foreign_agent_sees_nothing() {
        let mut store = StatementStore::new();
        store.store(
            vec![statement("a", "http://example.com/v", "http://example.com/a")],
            at(0),
        );

        let stranger = StatementFilter {
            agent: Some(json!({"mbox": "mailto:someone@else.com"})),
            ..Default::default()
        };
        assert_eq!(store.query(&stranger, &actor()), Some(vec![]));

        let own = StatementFilter {
            agent: Some(actor()),
            ..Default::default()
        };
        assert_eq!(store.query(&own, &actor()).unwrap().len(), 1);
    }

    #[test]
    fn test_since_exclusive_until_inclusive() {
        let mut store = StatementStore::new();
        store.store(vec![statement("a", "http://v", "http://a")], at(0));
        store.store(vec![statement("b", "http://v", "http://a")], at(10));
        store.store(vec![statement("c", "http://v", "http://a")], at(20));

        let filter = StatementFilter {
            since: Some(at(0)),
            until: Some(at(10)),
            ..Default::default()
        };
        let found = store.query(&filter, &actor()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], "b");
    }

    #[test]
    fn test_filter_deserializes_query_names() {
        let filter: StatementFilter = serde_json::from_value(json!({
            "statementId": "x",
            "related_activities": true,
            "limit": 3
        }))
        .unwrap();
        assert_eq!(filter.statement_id.as_deref(), Some("x"));
        assert!(filter.related_activities);
        assert_eq!(filter.limit, 3);
    }
}
