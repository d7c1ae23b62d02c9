//! Lexical checks for the value formats the xAPI data model uses.

use regex::Regex;
use std::sync::OnceLock;

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^P(?:\d+(?:\.\d+)?Y)?(?:\d+(?:\.\d+)?M)?(?:\d+(?:\.\d+)?W)?(?:\d+(?:\.\d+)?D)?(?:T(?:\d+(?:\.\d+)?H)?(?:\d+(?:\.\d+)?M)?(?:\d+(?:\.\d+)?S)?)?$",
        )
        .expect("duration pattern compiles")
    })
}

fn language_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[A-Za-z]{2,8}(?:-[A-Za-z0-9]{1,8})*|[xXiI](?:-[A-Za-z0-9]{1,8})+)$")
            .expect("language tag pattern compiles")
    })
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^1\.0(?:\.\d+)?$").expect("version pattern compiles"))
}

/// Hyphenated UUID of any version.
pub fn is_uuid(value: &str) -> bool {
    value.len() == 36 && uuid::Uuid::parse_str(value).is_ok()
}

/// Absolute IRI (anything with a scheme that parses as a URL).
pub fn is_iri(value: &str) -> bool {
    url::Url::parse(value).is_ok()
}

/// `mailto:` IRI with a non-empty local part and domain.
pub fn is_mailto(value: &str) -> bool {
    match value.strip_prefix("mailto:") {
        Some(address) => match address.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && !domain.is_empty() && !domain.contains('@')
            }
            None => false,
        },
        None => false,
    }
}

/// 40 hex digit SHA1 digest.
pub fn is_sha1_hex(value: &str) -> bool {
    value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// ISO 8601 timestamp. A timezone is recommended but not required.
pub fn is_timestamp(value: &str) -> bool {
    if chrono::DateTime::parse_from_rfc3339(value).is_ok() {
        return true;
    }
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}

/// ISO 8601 duration, e.g. `PT1H30M` or `P1D`.
pub fn is_duration(value: &str) -> bool {
    value.len() > 1 && !value.ends_with('T') && duration_regex().is_match(value)
}

/// RFC 5646 language tag (structural check only).
pub fn is_language_tag(value: &str) -> bool {
    language_tag_regex().is_match(value)
}

/// xAPI version string from the 1.0 line.
pub fn is_version(value: &str) -> bool {
    version_regex().is_match(value)
}

/// Parse a finite decimal number.
pub fn parse_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid() {
        assert!(is_uuid("3b9d6f1e-3d5e-4c3c-9e0e-6a2b2f8f4d11"));
        assert!(!is_uuid("3b9d6f1e3d5e4c3c9e0e6a2b2f8f4d11"));
        assert!(!is_uuid("not-a-uuid"));
    }

    #[test]
    fn test_mailto() {
        assert!(is_mailto("mailto:a@b.com"));
        assert!(!is_mailto("a@b.com"));
        assert!(!is_mailto("mailto:@b.com"));
        assert!(!is_mailto("mailto:ab.com"));
    }

    #[test]
    fn test_duration() {
        assert!(is_duration("PT1H30M"));
        assert!(is_duration("P1D"));
        assert!(is_duration("PT0.5S"));
        assert!(!is_duration("P"));
        assert!(!is_duration("PT"));
        assert!(!is_duration("1H"));
    }

    #[test]
    fn test_language_tag() {
        assert!(is_language_tag("en"));
        assert!(is_language_tag("en-US"));
        assert!(is_language_tag("zh-Hant-TW"));
        assert!(!is_language_tag("english language"));
        assert!(!is_language_tag(""));
    }

    #[test]
    fn test_timestamp() {
        assert!(is_timestamp("2024-01-02T03:04:05Z"));
        assert!(is_timestamp("2024-01-02T03:04:05.123+02:00"));
        assert!(is_timestamp("2024-01-02T03:04:05"));
        assert!(!is_timestamp("yesterday"));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("7"), Some(7.0));
        assert_eq!(parse_number("-1.5"), Some(-1.5));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("seven"), None);
    }
}
