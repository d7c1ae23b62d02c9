//! Capability shims installed into the sandboxed frame.

pub mod bloom;
pub mod cookie;
pub mod h5p;
pub mod kolibri;
pub mod scorm;
pub mod storage;
pub mod xapi;

pub use bloom::BloomShim;
pub use cookie::CookieShim;
pub use h5p::{H5pShim, H5pXApiAdapter};
pub use kolibri::KolibriShim;
pub use scorm::ScormShim;
pub use storage::{StorageKind, StorageShim};
pub use xapi::XApiShim;

use serde_json::Value;

/// Convert a value to a string the way JavaScript's `String(value)` does.
pub fn to_js_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                js_number(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_js_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// `Number.prototype.toString()`: plain decimal for magnitudes in
/// [1e-6, 1e21), shortest exponent form (`1e-7`, `1.5e+21`) otherwise.
fn js_number(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if f == 0.0 {
        return "0".to_string();
    }
    let magnitude = f.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return f.to_string();
    }
    let exponent_form = format!("{:e}", f);
    match exponent_form.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{}e+{}", mantissa, exponent)
        }
        _ => exponent_form,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_js_string_conversion() {
        assert_eq!(to_js_string(&json!(123)), "123");
        assert_eq!(to_js_string(&json!(1.5)), "1.5");
        assert_eq!(to_js_string(&json!(2.0)), "2");
        assert_eq!(to_js_string(&json!(null)), "null");
        assert_eq!(to_js_string(&json!(1e20)), "100000000000000000000");
        assert_eq!(to_js_string(&json!(1e21)), "1e+21");
        assert_eq!(to_js_string(&json!(1.5e300)), "1.5e+300");
        assert_eq!(to_js_string(&json!(1e-7)), "1e-7");
        assert_eq!(to_js_string(&json!(-2.5e-8)), "-2.5e-8");
        assert_eq!(to_js_string(&json!(0.000001)), "0.000001");
        assert_eq!(to_js_string(&json!(-0.0)), "0");
        assert_eq!(to_js_string(&json!([1, null, "a"])), "1,,a");
        assert_eq!(to_js_string(&json!({"a": 1})), "[object Object]");
    }
}
