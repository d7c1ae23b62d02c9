//! Interaction activity definitions: option lists and correct-response
//! pattern grammars.
//!
//! Pattern consistency is advisory in xAPI, so everything here reports a
//! problem description rather than failing validation outright; the schema
//! marks the rule as a warning.

use serde_json::{Map, Value};

use crate::formats::parse_number;

/// Every interaction type xAPI defines.
pub const INTERACTION_TYPES: &[&str] = &[
    "true-false",
    "choice",
    "fill-in",
    "long-fill-in",
    "matching",
    "performance",
    "sequencing",
    "likert",
    "numeric",
    "other",
];

/// Item separator within a pattern.
pub const ITEM_SEPARATOR: &str = "[,]";
/// Pair separator within a matching or performance item.
pub const PAIR_SEPARATOR: &str = "[.]";
/// Bound separator within a numeric range.
pub const RANGE_SEPARATOR: &str = "[:]";

/// Interaction option lists and the interaction types they belong to.
pub const OPTION_FIELDS: &[(&str, &[&str])] = &[
    ("choices", &["choice", "sequencing"]),
    ("scale", &["likert"]),
    ("source", &["matching"]),
    ("target", &["matching"]),
    ("steps", &["performance"]),
];

/// Strip leading `{case_matters=..}`, `{order_matters=..}` and `{lang=..}`
/// groups from a pattern.
pub fn strip_pattern_context(pattern: &str) -> &str {
    let mut rest = pattern;
    while rest.starts_with('{') {
        match rest.find('}') {
            Some(end) if rest[1..end].contains('=') => rest = &rest[end + 1..],
            _ => break,
        }
    }
    rest
}

/// A single number, `lower[:]`, `[:]upper` or `lower[:]upper` with
/// `lower < upper`.
pub fn is_numeric_range(pattern: &str) -> bool {
    match pattern.split_once(RANGE_SEPARATOR) {
        None => parse_number(pattern).is_some(),
        Some((lower, upper)) => match (lower.is_empty(), upper.is_empty()) {
            (true, true) => false,
            (false, true) => parse_number(lower).is_some(),
            (true, false) => parse_number(upper).is_some(),
            (false, false) => match (parse_number(lower), parse_number(upper)) {
                (Some(lower), Some(upper)) => lower < upper,
                _ => false,
            },
        },
    }
}

/// Ids declared in one of the option lists of an activity definition.
fn option_ids<'a>(definition: &'a Map<String, Value>, field: &str) -> Vec<&'a str> {
    definition
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("id").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

fn check_ids(items: &str, ids: &[&str], field: &str) -> Result<(), String> {
    for item in items.split(ITEM_SEPARATOR) {
        if !ids.contains(&item) {
            return Err(format!("response '{}' is not one of the declared {}", item, field));
        }
    }
    Ok(())
}

fn check_pairs(
    items: &str,
    left_ids: &[&str],
    left_field: &str,
    right_ids: Option<(&[&str], &str)>,
) -> Result<(), String> {
    for item in items.split(ITEM_SEPARATOR) {
        let (left, right) = item
            .split_once(PAIR_SEPARATOR)
            .ok_or_else(|| format!("response '{}' is not a '{}' separated pair", item, PAIR_SEPARATOR))?;
        if !left_ids.contains(&left) {
            return Err(format!("'{}' is not one of the declared {}", left, left_field));
        }
        match right_ids {
            Some((ids, field)) if !ids.contains(&right) => {
                return Err(format!("'{}' is not one of the declared {}", right, field));
            }
            None if right.is_empty() => {
                return Err(format!("step '{}' has an empty response", left));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Check one correct-response pattern against the definition it belongs to.
pub fn check_pattern(
    interaction_type: &str,
    pattern: &str,
    definition: &Map<String, Value>,
) -> Result<(), String> {
    let body = strip_pattern_context(pattern);
    match interaction_type {
        "true-false" => match body {
            "true" | "false" => Ok(()),
            _ => Err(format!("true-false response '{}' must be 'true' or 'false'", body)),
        },
        "choice" | "sequencing" => {
            if body.is_empty() {
                return Ok(());
            }
            check_ids(body, &option_ids(definition, "choices"), "choices")
        }
        "likert" => {
            let scale = option_ids(definition, "scale");
            if scale.contains(&body) {
                Ok(())
            } else {
                Err(format!("likert response '{}' is not one of the declared scale", body))
            }
        }
        "matching" => {
            let source = option_ids(definition, "source");
            let target = option_ids(definition, "target");
            check_pairs(body, &source, "source", Some((target.as_slice(), "target")))
        }
        "performance" => check_pairs(body, &option_ids(definition, "steps"), "steps", None),
        "numeric" => {
            if is_numeric_range(body) {
                Ok(())
            } else {
                Err(format!("numeric response '{}' is not a number or valid range", body))
            }
        }
        _ => Ok(()),
    }
}

/// First inconsistency between `correctResponsesPattern` and the rest of
/// the definition, if any.
pub fn pattern_problem(definition: &Map<String, Value>) -> Option<String> {
    let interaction_type = definition.get("interactionType")?.as_str()?;
    let patterns = definition.get("correctResponsesPattern")?.as_array()?;
    patterns
        .iter()
        .filter_map(Value::as_str)
        .find_map(|pattern| check_pattern(interaction_type, pattern, definition).err())
}
