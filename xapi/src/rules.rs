//! Validator kinds and their evaluator.
//!
//! A rule is data: the schema definitions list rules per field and the
//! schema engine asks each one to `test` the field value, then asks for a
//! `message` if the test failed. Whether a failure rejects the object or is
//! only logged is carried separately as the validator's [`Severity`].

use serde_json::{Map, Value};

use crate::formats;
use crate::interaction;

/// What a failed rule does to the object being cleaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Reject the object.
    Fatal,
    /// Log and keep going; used where xAPI recommends rather than requires.
    Warn,
}

/// A single check against one field of an object.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// JSON string.
    String,
    /// JSON boolean.
    Boolean,
    /// JSON number.
    Number,
    /// Non-negative whole number.
    NonNegativeInteger,
    /// JSON object.
    Object,
    /// JSON array of strings.
    StringArray,
    /// JSON array.
    Array,
    /// Hyphenated UUID string.
    Uuid,
    /// Absolute IRI string.
    Iri,
    /// `mailto:` IRI string.
    Mailto,
    /// SHA1 hex digest string.
    Sha1Hex,
    /// ISO 8601 timestamp string.
    Timestamp,
    /// ISO 8601 duration string.
    Duration,
    /// Object mapping language tags to strings.
    LanguageMap,
    /// RFC 5646 language tag string.
    LanguageTag,
    /// Object whose keys are IRIs.
    Extensions,
    /// xAPI 1.0.x version string.
    Version,
    /// String equal to one of the listed values.
    OneOf(&'static [&'static str]),
    /// No more than one of the listed sibling fields is present.
    AtMostOneOf(&'static [&'static str]),
    /// Legal only when the sibling `interactionType` is one of these.
    InteractionTypeIn(&'static [&'static str]),
    /// Legal only when the named sibling is present.
    RequiresSibling(&'static str),
    /// Never legal on this object.
    Forbidden,
    /// Number within inclusive bounds.
    Range { min: f64, max: f64 },
    /// Number strictly below the named sibling, when that sibling is present.
    LessThanSibling(&'static str),
    /// Number between the named siblings (inclusive), where present.
    BetweenSiblings {
        lower: &'static str,
        upper: &'static str,
    },
    /// Array of objects with unique `id` fields.
    UniqueIds,
    /// Nested object's `objectType` is not this value.
    NotObjectType(&'static str),
    /// `correctResponsesPattern` agrees with the declared interaction options.
    ResponsePatterns,
    /// `revision`/`platform` on a context only when the statement object is
    /// an Activity. Attached to the statement's `context` field.
    ActivityOnlyContext,
}

/// Fields on a context that xAPI restricts to Activity objects.
const ACTIVITY_ONLY_CONTEXT_FIELDS: &[&str] = &["revision", "platform"];

fn object_type_of(value: &Value) -> Option<&str> {
    value.get("objectType").and_then(Value::as_str)
}

fn is_activity_object(value: &Value) -> bool {
    matches!(object_type_of(value), None | Some("Activity"))
}

impl Rule {
    /// Does `value` (stored under `key` in `object`) satisfy this rule?
    pub fn test(&self, value: &Value, _key: &str, object: &Map<String, Value>) -> bool {
        match self {
            Rule::String => value.is_string(),
            Rule::Boolean => value.is_boolean(),
            Rule::Number => value.is_number(),
            Rule::NonNegativeInteger => value.as_u64().is_some(),
            Rule::Object => value.is_object(),
            Rule::StringArray => value
                .as_array()
                .map(|items| items.iter().all(Value::is_string))
                .unwrap_or(false),
            Rule::Array => value.is_array(),
            Rule::Uuid => value.as_str().map(formats::is_uuid).unwrap_or(false),
            Rule::Iri => value.as_str().map(formats::is_iri).unwrap_or(false),
            Rule::Mailto => value.as_str().map(formats::is_mailto).unwrap_or(false),
            Rule::Sha1Hex => value.as_str().map(formats::is_sha1_hex).unwrap_or(false),
            Rule::Timestamp => value.as_str().map(formats::is_timestamp).unwrap_or(false),
            Rule::Duration => value.as_str().map(formats::is_duration).unwrap_or(false),
            Rule::LanguageMap => value
                .as_object()
                .map(|map| {
                    map.iter()
                        .all(|(tag, text)| formats::is_language_tag(tag) && text.is_string())
                })
                .unwrap_or(false),
            Rule::LanguageTag => value.as_str().map(formats::is_language_tag).unwrap_or(false),
            Rule::Extensions => value
                .as_object()
                .map(|map| map.keys().all(|k| formats::is_iri(k)))
                .unwrap_or(false),
            Rule::Version => value.as_str().map(formats::is_version).unwrap_or(false),
            Rule::OneOf(options) => value
                .as_str()
                .map(|s| options.contains(&s))
                .unwrap_or(false),
            Rule::AtMostOneOf(fields) => {
                fields.iter().filter(|f| object.contains_key(**f)).count() <= 1
            }
            Rule::InteractionTypeIn(types) => object
                .get("interactionType")
                .and_then(Value::as_str)
                .map(|t| types.contains(&t))
                .unwrap_or(false),
            Rule::RequiresSibling(sibling) => object.contains_key(*sibling),
            Rule::Forbidden => false,
            Rule::Range { min, max } => value
                .as_f64()
                .map(|n| n >= *min && n <= *max)
                .unwrap_or(false),
            Rule::LessThanSibling(sibling) => match (value.as_f64(), object.get(*sibling)) {
                (Some(n), Some(other)) => other.as_f64().map(|o| n < o).unwrap_or(true),
                (Some(_), None) => true,
                (None, _) => false,
            },
            Rule::BetweenSiblings { lower, upper } => {
                let n = match value.as_f64() {
                    Some(n) => n,
                    None => return false,
                };
                let above = object
                    .get(*lower)
                    .and_then(Value::as_f64)
                    .map(|l| n >= l)
                    .unwrap_or(true);
                let below = object
                    .get(*upper)
                    .and_then(Value::as_f64)
                    .map(|u| n <= u)
                    .unwrap_or(true);
                above && below
            }
            Rule::UniqueIds => match value.as_array() {
                Some(items) => {
                    let mut seen = std::collections::HashSet::new();
                    items
                        .iter()
                        .filter_map(|item| item.get("id").and_then(Value::as_str))
                        .all(|id| seen.insert(id))
                }
                None => false,
            },
            Rule::NotObjectType(forbidden) => object_type_of(value) != Some(*forbidden),
            Rule::ResponsePatterns => interaction::pattern_problem(object).is_none(),
            Rule::ActivityOnlyContext => {
                let uses_restricted = ACTIVITY_ONLY_CONTEXT_FIELDS
                    .iter()
                    .any(|f| value.get(*f).is_some());
                if !uses_restricted {
                    return true;
                }
                object.get("object").map(is_activity_object).unwrap_or(true)
            }
        }
    }

    /// Human readable reason `key` failed this rule.
    pub fn message(&self, key: &str, object: &Map<String, Value>) -> String {
        match self {
            Rule::String => format!("{} must be a string", key),
            Rule::Boolean => format!("{} must be a boolean", key),
            Rule::Number => format!("{} must be a number", key),
            Rule::NonNegativeInteger => format!("{} must be a non-negative integer", key),
            Rule::Object => format!("{} must be an object", key),
            Rule::StringArray => format!("{} must be an array of strings", key),
            Rule::Array => format!("{} must be an array", key),
            Rule::Uuid => format!("{} must be a valid UUID", key),
            Rule::Iri => format!("{} must be a valid IRI", key),
            Rule::Mailto => format!("{} must be a mailto IRI", key),
            Rule::Sha1Hex => format!("{} must be a SHA1 hex digest", key),
            Rule::Timestamp => format!("{} must be an ISO 8601 timestamp", key),
            Rule::Duration => format!("{} must be an ISO 8601 duration", key),
            Rule::LanguageMap => format!("{} must be a language map", key),
            Rule::LanguageTag => format!("{} must be an RFC 5646 language tag", key),
            Rule::Extensions => format!("{} keys must be IRIs", key),
            Rule::Version => format!("{} must be a 1.0.x version", key),
            Rule::OneOf(options) => {
                format!("{} must be one of: {}", key, options.join(", "))
            }
            Rule::AtMostOneOf(fields) => {
                format!("only one of {} may be present", fields.join(", "))
            }
            Rule::InteractionTypeIn(types) => {
                let actual = object
                    .get("interactionType")
                    .and_then(Value::as_str)
                    .unwrap_or("none");
                format!(
                    "{} is only valid for interactionType {} (got {})",
                    key,
                    types.join(" or "),
                    actual
                )
            }
            Rule::RequiresSibling(sibling) => {
                format!("{} is only valid when {} is present", key, sibling)
            }
            Rule::Forbidden => format!("{} is not allowed here", key),
            Rule::Range { min, max } => format!("{} must be between {} and {}", key, min, max),
            Rule::LessThanSibling(sibling) => format!("{} must be less than {}", key, sibling),
            Rule::BetweenSiblings { lower, upper } => {
                format!("{} must be between {} and {}", key, lower, upper)
            }
            Rule::UniqueIds => format!("{} ids must be unique", key),
            Rule::NotObjectType(forbidden) => {
                format!("{} must not have objectType {}", key, forbidden)
            }
            Rule::ResponsePatterns => interaction::pattern_problem(object)
                .map(|problem| format!("{}: {}", key, problem))
                .unwrap_or_else(|| format!("{} is inconsistent with the interaction", key)),
            Rule::ActivityOnlyContext => format!(
                "{}.{} may only be used when the object is an Activity",
                key,
                ACTIVITY_ONLY_CONTEXT_FIELDS.join("/")
            ),
        }
    }
}

/// A rule together with what happens when it fails.
#[derive(Debug, Clone, PartialEq)]
pub struct Validator {
    /// The check to run
    pub rule: Rule,
    /// Fatal or advisory
    pub severity: Severity,
}

impl Validator {
    /// A rule whose failure rejects the object.
    pub fn fatal(rule: Rule) -> Self {
        Self {
            rule,
            severity: Severity::Fatal,
        }
    }

    /// A rule whose failure is only logged.
    pub fn warn(rule: Rule) -> Self {
        Self {
            rule,
            severity: Severity::Warn,
        }
    }
}
