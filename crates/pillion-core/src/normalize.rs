//! Payload normalization boundary.
//!
//! Broker frames and backend responses describe the same concepts with
//! different field names and value shapes: a fare can be `15000`,
//! `"15,000"` or `{"amount": 15000}`, a pickup name can live under
//! `pickupLocationName`, `pickupAddress` or `pickup.name`, and identifiers
//! arrive as numbers or strings (sometimes the literal `"undefined"`).
//!
//! [`Payload`] is a read-only view over a JSON object that resolves each
//! concept through an ordered list of candidate paths and returns a typed
//! value. Callers never inspect raw `serde_json::Value`s themselves.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::errors::DecodeError;

/// Values that mean "no value" when they appear in a text field.
const PLACEHOLDER_TEXT: &[&str] = &["n/a", "na", "null", "undefined", "none", "-"];

/// Values that mean "no identifier" when they appear in an ID field.
const SENTINEL_IDS: &[&str] = &["undefined", "null", "nan", "none"];

/// Read-only view over a JSON object.
#[derive(Clone, Copy, Debug)]
pub struct Payload<'a> {
    value: &'a Value,
}

impl<'a> Payload<'a> {
    /// Wrap a JSON value. Fails unless the value is an object.
    pub fn new(value: &'a Value) -> Result<Self, DecodeError> {
        if value.is_object() {
            Ok(Self { value })
        } else {
            Err(DecodeError::NotAnObject(json_kind(value)))
        }
    }

    /// The underlying JSON value.
    pub fn raw(&self) -> &'a Value {
        self.value
    }

    /// Look up a dotted path (`"pickup.name"`). `null` counts as absent.
    pub fn get(&self, path: &str) -> Option<&'a Value> {
        let mut current = self.value;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        (!current.is_null()).then_some(current)
    }

    /// Nested object at `path`, if present.
    pub fn nested(&self, path: &str) -> Option<Payload<'a>> {
        self.get(path).and_then(|v| Payload::new(v).ok())
    }

    /// First candidate that holds a usable identifier.
    pub fn id(&self, candidates: &[&str]) -> Option<String> {
        candidates
            .iter()
            .find_map(|path| self.get(path).and_then(id_from_value))
    }

    /// First candidate that holds meaningful text (placeholders skipped).
    pub fn text(&self, candidates: &[&str]) -> Option<String> {
        candidates.iter().find_map(|path| {
            let s = self.get(path)?.as_str()?.trim();
            (!is_placeholder_text(s)).then(|| s.to_string())
        })
    }

    /// First candidate that holds a finite number (numeric strings accepted).
    pub fn number(&self, candidates: &[&str]) -> Option<f64> {
        candidates.iter().find_map(|path| match self.get(path)? {
            Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        })
    }

    /// First candidate that normalises to a fare; `0.0` when none does.
    pub fn fare(&self, candidates: &[&str]) -> f64 {
        candidates
            .iter()
            .find_map(|path| self.get(path).and_then(normalize_fare))
            .unwrap_or(0.0)
    }

    /// First candidate that parses as a timestamp.
    pub fn timestamp(&self, candidates: &[&str]) -> Option<DateTime<Utc>> {
        candidates.iter().find_map(|path| match self.get(path)? {
            Value::String(s) => parse_timestamp(s),
            Value::Number(n) => n.as_i64().and_then(timestamp_from_epoch),
            _ => None,
        })
    }

    /// First candidate holding a status discriminator, upper-cased.
    pub fn status(&self, candidates: &[&str]) -> Option<String> {
        self.text(candidates).map(|s| s.to_ascii_uppercase())
    }

    /// First candidate holding a boolean (`"true"`/`"false"` accepted).
    pub fn flag(&self, candidates: &[&str]) -> Option<bool> {
        candidates.iter().find_map(|path| match self.get(path)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }
}

/// Extract a fare from a number, a numeric string, or an `{amount}` object.
///
/// Thousands separators, whitespace and a currency prefix/suffix are
/// tolerated in strings (`"15,000"`, `"15000 VND"`, `"₫15000"`). Without a
/// comma, dots followed by groups of exactly three digits are thousands
/// separators too (`"15.000"`, `"1.250.000 đ"`).
pub fn normalize_fare(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_fare_text(s),
        Value::Object(map) => map.get("amount").and_then(normalize_fare),
        _ => None,
    }
}

fn parse_fare_text(text: &str) -> Option<f64> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '_')
        .collect();
    let numeric = compact
        .trim_start_matches(|c: char| !(c.is_ascii_digit() || c == '-' || c == '.'))
        .trim_end_matches(|c: char| !(c.is_ascii_digit() || c == '.'));
    if !text.contains(',') && is_dot_grouped(numeric) {
        return numeric.replace('.', "").parse::<f64>().ok();
    }
    numeric.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn is_dot_grouped(numeric: &str) -> bool {
    let digits = numeric.strip_prefix('-').unwrap_or(numeric);
    let mut groups = digits.split('.');
    let head = groups.next().unwrap_or_default();
    let mut tail = groups.peekable();
    tail.peek().is_some()
        && (1..=3).contains(&head.len())
        && !head.starts_with('0')
        && head.bytes().all(|b| b.is_ascii_digit())
        && tail.all(|g| g.len() == 3 && g.bytes().all(|b| b.is_ascii_digit()))
}

/// Turn a JSON number or string into an identifier string.
///
/// Integral floats (`42.0`) render without a fraction. Sentinels yield `None`.
pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                #[allow(clippy::cast_possible_truncation)]
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| (f as i64).to_string())
            }
        }
        Value::String(s) => {
            let s = s.trim();
            (!is_sentinel_id(s)).then(|| s.to_string())
        }
        _ => None,
    }
}

/// Whether an identifier string is a known "no value" marker.
///
/// Covers the empty string, `"undefined"`/`"null"`, and unresolved template
/// placeholders such as `"${rideId}"`, `"{rideId}"` or `":rideId"`.
pub fn is_sentinel_id(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lower = trimmed.to_ascii_lowercase();
    SENTINEL_IDS.contains(&lower.as_str())
        || trimmed.contains("${")
        || (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || trimmed.starts_with(':')
}

/// Whether a text value is a placeholder such as `""` or `"N/A"`.
pub fn is_placeholder_text(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || PLACEHOLDER_TEXT.contains(&trimmed.to_ascii_lowercase().as_str())
}

/// Parse an ISO-8601 timestamp. Offset-less values are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Epoch seconds or milliseconds (values above 1e11 are milliseconds).
fn timestamp_from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() > 100_000_000_000 {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn payload_rejects_non_objects() {
        assert_matches!(
            Payload::new(&json!([1, 2])),
            Err(DecodeError::NotAnObject("array"))
        );
        assert!(Payload::new(&json!({})).is_ok());
    }

    #[test]
    fn dotted_paths_resolve() {
        let v = json!({"pickup": {"name": "Gate B"}});
        let p = Payload::new(&v).unwrap();
        assert_eq!(p.text(&["pickup.name"]).as_deref(), Some("Gate B"));
        assert!(p.get("pickup.missing").is_none());
    }

    #[test]
    fn fare_from_number_string_and_object() {
        assert_eq!(normalize_fare(&json!(15000)), Some(15000.0));
        assert_eq!(normalize_fare(&json!("15000")), Some(15000.0));
        assert_eq!(normalize_fare(&json!({"amount": "12500.5"})), Some(12500.5));
        assert_eq!(normalize_fare(&json!("15,000 VND")), Some(15000.0));
        assert_eq!(normalize_fare(&json!("₫20000")), Some(20000.0));
    }

    #[test]
    fn dot_thousands_separators() {
        assert_eq!(normalize_fare(&json!("15.000")), Some(15000.0));
        assert_eq!(normalize_fare(&json!("1.250.000 đ")), Some(1_250_000.0));
        assert_eq!(normalize_fare(&json!("15.5")), Some(15.5));
        assert_eq!(normalize_fare(&json!("0.500")), Some(0.5));
        assert_eq!(normalize_fare(&json!("1,234.567")), Some(1234.567));
    }

    #[test]
    fn unparseable_fare_defaults_to_zero() {
        let v = json!({"totalFare": "free", "fare": {"currency": "VND"}});
        let p = Payload::new(&v).unwrap();
        assert!((p.fare(&["totalFare", "fare"]) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fare_falls_through_candidates() {
        let v = json!({"totalFare": "abc", "fare": 9000});
        let p = Payload::new(&v).unwrap();
        assert!((p.fare(&["totalFare", "fare"]) - 9000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn placeholder_text_is_skipped() {
        let v = json!({"pickupLocationName": "N/A", "pickupAddress": "", "pickup": {"name": "Dorm A"}});
        let p = Payload::new(&v).unwrap();
        assert_eq!(
            p.text(&["pickupLocationName", "pickupAddress", "pickup.name"])
                .as_deref(),
            Some("Dorm A")
        );
    }

    #[test]
    fn ids_normalise_numbers_and_reject_sentinels() {
        assert_eq!(id_from_value(&json!(42)).as_deref(), Some("42"));
        assert_eq!(id_from_value(&json!(42.0)).as_deref(), Some("42"));
        assert_eq!(id_from_value(&json!("  77 ")).as_deref(), Some("77"));
        assert_eq!(id_from_value(&json!("undefined")), None);
        assert_eq!(id_from_value(&json!("${rideId}")), None);
        assert_eq!(id_from_value(&json!(1.5)), None);
        assert_eq!(id_from_value(&json!(true)), None);
    }

    #[test]
    fn sentinel_detection() {
        for s in ["", " ", "undefined", "NULL", "${id}", "{rideId}", ":rideId", "NaN"] {
            assert!(is_sentinel_id(s), "{s:?} should be a sentinel");
        }
        for s in ["42", "abc-1", "r_7"] {
            assert!(!is_sentinel_id(s), "{s:?} should be valid");
        }
    }

    #[test]
    fn timestamps_parse_with_and_without_offset() {
        let a = parse_timestamp("2025-03-01T10:00:00Z").unwrap();
        let b = parse_timestamp("2025-03-01T17:00:00+07:00").unwrap();
        let c = parse_timestamp("2025-03-01T10:00:00.000").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(parse_timestamp("tomorrow").is_none());
    }

    #[test]
    fn epoch_timestamps() {
        let v = json!({"ms": 1_700_000_000_000_i64, "s": 1_700_000_000});
        let p = Payload::new(&v).unwrap();
        assert_eq!(p.timestamp(&["ms"]), p.timestamp(&["s"]));
    }

    #[test]
    fn status_is_upper_cased() {
        let v = json!({"type": "accepted"});
        let p = Payload::new(&v).unwrap();
        assert_eq!(p.status(&["status", "type"]).as_deref(), Some("ACCEPTED"));
    }

    #[test]
    fn flags_accept_strings() {
        let v = json!({"a": "true", "b": false});
        let p = Payload::new(&v).unwrap();
        assert_eq!(p.flag(&["a"]), Some(true));
        assert_eq!(p.flag(&["b"]), Some(false));
        assert_eq!(p.flag(&["c"]), None);
    }

    proptest! {
        #[test]
        fn integer_fares_roundtrip_through_strings(n in 0u32..10_000_000) {
            let from_string = normalize_fare(&json!(n.to_string())).unwrap();
            let from_number = normalize_fare(&json!(n)).unwrap();
            prop_assert!((from_string - from_number).abs() < f64::EPSILON);
        }

        #[test]
        fn numeric_ids_are_never_sentinels(n in 0u64..u64::MAX) {
            prop_assert_eq!(id_from_value(&json!(n)), Some(n.to_string()));
        }
    }
}
