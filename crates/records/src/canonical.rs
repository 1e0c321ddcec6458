//! Canonical JSON encoding for fingerprinting.
//!
//! Two processes fingerprinting logically identical records must hash the
//! same bytes. The encoding is compact JSON with object keys sorted by
//! byte order at every depth and no insignificant whitespace. Key order is
//! imposed here rather than inherited from `serde_json::Map`, whose order
//! depends on the `preserve_order` feature.
//!
//! Timestamps must already be rendered as strings; [`timestamp`] provides
//! the fixed form records use.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Appends the canonical encoding of `value` to `out`.
pub fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        Value::String(s) => write_string(s, out),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
    }
}

/// Returns the canonical encoding of `value`.
#[must_use]
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_string(s: &str, out: &mut String) {
    // serde_json's escaping is deterministic and minimal.
    out.push_str(&Value::String(s.to_owned()).to_string());
}

/// Renders a timestamp as `YYYY-MM-DDTHH:MM:SS.ffffffZ` in UTC.
#[must_use]
pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Serde adapter storing timestamps in the canonical form.
pub mod canonical_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes `at` with [`super::timestamp`].
    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::timestamp(at))
    }

    /// Accepts any RFC 3339 timestamp and normalizes it to UTC.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{FixedOffset, TimeZone};
    use serde_json::json;

    use super::*;

    #[test]
    fn sorts_keys_at_every_depth() {
        let value = json!({"b": 1, "a": {"z": null, "y": [true, {"d": "x", "c": 2.5}]}});
        assert_eq!(
            to_canonical_string(&value),
            r#"{"a":{"y":[true,{"c":2.5,"d":"x"}],"z":null},"b":1}"#
        );
    }

    #[test]
    fn keys_sort_by_bytes_not_case_insensitively() {
        let value = json!({"a": 1, "B": 2, "_": 3});
        assert_eq!(to_canonical_string(&value), r#"{"B":2,"_":3,"a":1}"#);
    }

    #[test]
    fn escapes_strings() {
        let value = json!({"note": "line\n\"quoted\""});
        assert_eq!(to_canonical_string(&value), r#"{"note":"line\n\"quoted\""}"#);
    }

    #[test]
    fn timestamps_are_fixed_width_utc() {
        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let local = ist.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();
        assert_eq!(timestamp(&local.with_timezone(&Utc)), "2024-03-01T05:00:00.000000Z");
    }
}
