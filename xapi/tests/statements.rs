//! Integration tests for statement validation, storage and progress.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use xapi::{calculate_progress, SchemaKind, StatementFilter, StatementStore, VOIDED_VERB};

const LEARNER: &str = "mailto:learner@hashi.xapi";

fn statement(verb: &str) -> Value {
    json!({
        "actor": {"objectType": "Agent", "mbox": LEARNER},
        "verb": {"id": verb, "display": {"en-US": "did"}},
        "object": {"id": "http://example.com/activity"}
    })
}

/// Identifier fields on an Agent are mutually exclusive and one is required
#[test]
fn test_agent_exclusivity() {
    let both = json!({"mbox": "mailto:a@b.com", "openid": "x"});
    assert!(SchemaKind::Agent.clean(both).is_err());

    let one = json!({"mbox": "mailto:a@b.com"});
    assert_eq!(SchemaKind::Agent.clean(one.clone()).unwrap(), one);

    assert!(SchemaKind::Agent.clean(json!({})).is_err());
}

/// Numeric range patterns: valid forms pass silently, bad ones only warn
#[test]
fn test_numeric_interaction_grammar() {
    let definition = |pattern: &str| {
        json!({
            "interactionType": "numeric",
            "correctResponsesPattern": [pattern]
        })
    };

    for good in ["7", "7[:]", "[:]7", "4[:]7"] {
        let cleaned = SchemaKind::ActivityDefinition
            .clean_with_warnings(definition(good))
            .unwrap();
        assert!(cleaned.warnings.is_empty(), "{} should not warn", good);
    }

    for bad in ["7[:]4", "invalid"] {
        let cleaned = SchemaKind::ActivityDefinition
            .clean_with_warnings(definition(bad))
            .unwrap();
        assert_eq!(cleaned.warnings.len(), 1, "{} should warn once", bad);
    }
}

/// Nested errors name the path to the failing field
#[test]
fn test_nested_error_chain() {
    let mut s = statement("http://adlnet.gov/expapi/verbs/experienced");
    s["context"] = json!({"registration": "not-a-uuid"});

    let err = SchemaKind::Statement.clean(s).unwrap_err();
    assert_eq!(err.message(), "in context: registration must be a valid UUID");
}

/// Warnings from deep inside a statement keep their path
#[test]
fn test_nested_warning_path() {
    let mut s = statement("http://adlnet.gov/expapi/verbs/answered");
    s["object"]["definition"] = json!({
        "interactionType": "choice",
        "choices": [{"id": "a"}, {"id": "b"}],
        "correctResponsesPattern": ["c"]
    });

    let cleaned = SchemaKind::Statement.clean_with_warnings(s).unwrap();
    assert_eq!(cleaned.warnings.len(), 1);
    assert!(cleaned.warnings[0].starts_with("in object: in definition: correctResponsesPattern"));
}

#[test]
fn test_statement_defaults() {
    let cleaned = SchemaKind::Statement
        .clean(statement("http://adlnet.gov/expapi/verbs/experienced"))
        .unwrap();
    assert!(xapi::formats::is_uuid(cleaned["id"].as_str().unwrap()));
    assert_eq!(cleaned["version"], "1.0.0");
}

#[test]
fn test_sub_statement_cannot_nest() {
    let mut s = statement("http://adlnet.gov/expapi/verbs/experienced");
    let mut inner = statement("http://adlnet.gov/expapi/verbs/experienced");
    inner["objectType"] = json!("SubStatement");
    let mut innermost = inner.clone();
    innermost["object"] = json!({"objectType": "SubStatement"});
    s["object"] = innermost;

    let err = SchemaKind::Statement.clean(s.clone()).unwrap_err();
    assert_eq!(
        err.message(),
        "in object: object must not have objectType SubStatement"
    );

    s["object"] = inner;
    assert!(SchemaKind::Statement.clean(s).is_ok());
}

#[test]
fn test_sub_statement_forbids_id() {
    let mut s = statement("http://adlnet.gov/expapi/verbs/experienced");
    let mut inner = statement("http://adlnet.gov/expapi/verbs/experienced");
    inner["objectType"] = json!("SubStatement");
    inner["id"] = json!("3b9d6f1e-3d5e-4c3c-9e0e-6a2b2f8f4d11");
    s["object"] = inner;

    let err = SchemaKind::Statement.clean(s).unwrap_err();
    assert_eq!(err.message(), "in object: id is not allowed here");
}

#[test]
fn test_score_must_be_consistent() {
    let mut s = statement("http://adlnet.gov/expapi/verbs/scored");
    s["result"] = json!({"score": {"raw": 11, "min": 0, "max": 10}});

    let err = SchemaKind::Statement.clean(s).unwrap_err();
    assert_eq!(err.message(), "in result: in score: raw must be between min and max");
}

#[test]
fn test_progress_cases() {
    let completed = [json!({"verb": {"id": "http://adlnet.gov/expapi/verbs/completed"}})];
    assert_eq!(calculate_progress(&completed), Some(1.0));

    let scored = [json!({"result": {"score": {"raw": 5, "min": 0, "max": 10}}})];
    assert_eq!(calculate_progress(&scored), Some(0.5));

    let none: Vec<Value> = Vec::new();
    assert_eq!(calculate_progress(&none), None);
}

/// Stored statements come back newest first, or oldest first on request
#[test]
fn test_storage_ordering() {
    let mut store = StatementStore::new();
    let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    for id in ["A", "B", "C"] {
        let mut s = statement("http://adlnet.gov/expapi/verbs/experienced");
        s["id"] = json!(id);
        store.store(vec![s], now);
    }
    let actor = json!({"mbox": LEARNER});

    let ids = |found: Vec<Value>| -> Vec<String> {
        found
            .iter()
            .map(|s| s["id"].as_str().unwrap().to_string())
            .collect()
    };

    let newest_first = store.query(&StatementFilter::default(), &actor).unwrap();
    assert_eq!(ids(newest_first), vec!["C", "B", "A"]);

    let ascending = StatementFilter {
        ascending: true,
        ..Default::default()
    };
    assert_eq!(ids(store.query(&ascending, &actor).unwrap()), vec!["A", "B", "C"]);

    let limited = StatementFilter {
        limit: 2,
        ..Default::default()
    };
    assert_eq!(ids(store.query(&limited, &actor).unwrap()), vec!["C", "B"]);
}

#[test]
fn test_voided_statements() {
    let mut store = StatementStore::new();
    let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let target_id = "3b9d6f1e-3d5e-4c3c-9e0e-6a2b2f8f4d11";

    let mut target = statement("http://adlnet.gov/expapi/verbs/experienced");
    target["id"] = json!(target_id);
    let mut voiding = statement(VOIDED_VERB);
    voiding["object"] = json!({"objectType": "StatementRef", "id": target_id});
    store.store(vec![target, voiding], now);

    let actor = json!({"mbox": LEARNER});
    let by_id = StatementFilter {
        statement_id: Some(target_id.to_string()),
        ..Default::default()
    };
    assert_eq!(store.query(&by_id, &actor), None);

    let by_voided_id = StatementFilter {
        voided_statement_id: Some(target_id.to_string()),
        ..Default::default()
    };
    assert_eq!(store.query(&by_voided_id, &actor).unwrap().len(), 1);

    let all = store.query(&StatementFilter::default(), &actor).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0]["verb"]["id"], VOIDED_VERB);
}

#[test]
fn test_related_activities() {
    let mut store = StatementStore::new();
    let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut s = statement("http://adlnet.gov/expapi/verbs/experienced");
    s["context"] = json!({"contextActivities": {"parent": [{"id": "http://example.com/course"}]}});
    store.store(vec![s], now);
    let actor = json!({"mbox": LEARNER});

    let mut filter = StatementFilter {
        activity: Some("http://example.com/course".into()),
        ..Default::default()
    };
    assert!(store.query(&filter, &actor).unwrap().is_empty());

    filter.related_activities = true;
    assert_eq!(store.query(&filter, &actor).unwrap().len(), 1);
}
