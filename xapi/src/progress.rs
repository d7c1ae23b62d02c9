//! Progress estimate derived from stored statements.

use serde_json::Value;

/// ADL verbs that mean the learner is done.
pub const COMPLETION_VERBS: &[&str] = &[
    "http://adlnet.gov/expapi/verbs/mastered",
    "http://adlnet.gov/expapi/verbs/passed",
    "http://adlnet.gov/expapi/verbs/completed",
];

fn is_finished(statement: &Value) -> bool {
    let verb = statement.pointer("/verb/id").and_then(Value::as_str);
    if verb.map(|v| COMPLETION_VERBS.contains(&v)).unwrap_or(false) {
        return true;
    }
    statement.pointer("/result/success").and_then(Value::as_bool) == Some(true)
}

/// Fraction represented by a score, if it carries enough to compute one.
fn score_fraction(score: &Value) -> Option<f64> {
    if let Some(scaled) = score.get("scaled").and_then(Value::as_f64) {
        return Some(scaled);
    }
    let raw = score.get("raw").and_then(Value::as_f64)?;
    let max = score.get("max").and_then(Value::as_f64)?;
    let min = score.get("min").and_then(Value::as_f64).unwrap_or(0.0);
    if max <= min {
        return None;
    }
    Some((raw - min) / (max - min))
}

/// Progress in `[0, 1]` across `statements` (newest first), or `None` when
/// nothing in them says anything about progress.
///
/// Any finished statement counts as complete; otherwise the newest score
/// decides.
pub fn calculate_progress<'a>(statements: impl IntoIterator<Item = &'a Value>) -> Option<f64> {
    let mut newest_score = None;
    for statement in statements {
        if is_finished(statement) {
            return Some(1.0);
        }
        if newest_score.is_none() {
            newest_score = statement.pointer("/result/score").and_then(score_fraction);
        }
    }
    newest_score.map(|p| p.clamp(0.0, 1.0))
}
