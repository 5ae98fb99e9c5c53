//! `dateTime.iso8601` parsing and formatting, plus a serde helper module.
//!
//! The canonical XML-RPC form is `yyyyMMdd'T'HH:mm:ss` with no zone. Peers
//! in the wild also send `yyyy-MM-ddTHH:mm:ss`, a trailing `Z`, compact
//! times and fractional seconds; those are accepted only when
//! [`NonStandard::allow_non_standard_date_time`] is set.
//!
//! # Usage with serde
//!
//! Annotate a `chrono::NaiveDateTime` field with
//! `#[serde(with = "xmlrpc_serde::datetime")]` to have it travel as
//! `<dateTime.iso8601>` instead of a string:
//!
//! ```rust
//! use chrono::NaiveDate;
//! use serde::{Deserialize, Serialize};
//! use xmlrpc_serde::{Value, from_value, to_value};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Post {
//!     title: String,
//!     #[serde(with = "xmlrpc_serde::datetime")]
//!     created: chrono::NaiveDateTime,
//! }
//!
//! let created = NaiveDate::from_ymd_opt(1998, 7, 17)
//!     .unwrap()
//!     .and_hms_opt(14, 8, 55)
//!     .unwrap();
//! let post = Post { title: "hello".into(), created };
//!
//! let value = to_value(&post).unwrap();
//! let fields = value.as_struct().unwrap();
//! assert_eq!(fields.get("created"), Some(&Value::DateTime(created)));
//!
//! let decoded: Post = from_value(value).unwrap();
//! assert_eq!(decoded, post);
//! ```

use crate::settings::NonStandard;
use chrono::{NaiveDate, NaiveDateTime};

/// chrono format of the canonical wire form.
pub const DEFAULT_FORMAT: &str = "%Y%m%dT%H:%M:%S";

const NON_STANDARD_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y%m%dT%H%M%S",
    "%Y-%m-%dT%H%M%S",
    "%Y%m%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

const ZERO_SENTINELS: &[&str] = &[
    "00000000T00:00:00",
    "0000-00-00T00:00:00Z",
    "00000000T00:00:00Z",
    "0000-00-00T00:00:00",
];

/// The minimum date, 0001-01-01T00:00:00.
pub fn min_value() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Parse `text` as a dateTime value, honoring the compatibility switches.
/// Returns `None` when the text is not an accepted form.
pub fn parse(text: &str, compat: &NonStandard) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return compat.map_empty_date_time_to_min_value.then(min_value);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, DEFAULT_FORMAT) {
        return Some(dt);
    }
    if compat.map_zeros_date_time_to_min_value && ZERO_SENTINELS.contains(&text) {
        return Some(min_value());
    }
    if compat.allow_non_standard_date_time {
        let text = text.strip_suffix('Z').unwrap_or(text);
        for format in std::iter::once(&DEFAULT_FORMAT).chain(NON_STANDARD_FORMATS) {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
                return Some(dt);
            }
        }
    }
    None
}

/// Format `dt` with a chrono format string.
pub fn format(dt: &NaiveDateTime, format: &str) -> String {
    dt.format(format).to_string()
}

/// Format `dt` in the canonical wire form.
pub fn format_canonical(dt: &NaiveDateTime) -> String {
    format(dt, DEFAULT_FORMAT)
}

// ── serde `with` module functions ─────────────────────────────────────────

/// Serialize a date-time so that the crate's serializer produces a
/// [`Value::DateTime`](crate::Value::DateTime). Other serializers see the
/// canonical string.
pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_newtype_struct(
        crate::DATE_TIME_TOKEN,
        &format_canonical(value),
    )
}

/// Deserialize a date-time from a `dateTime.iso8601` value or from a string
/// in the canonical or non-standard forms.
pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserializer.deserialize_newtype_struct(crate::DATE_TIME_TOKEN, DateTimeVisitor)
}

struct DateTimeVisitor;

impl<'de> serde::de::Visitor<'de> for DateTimeVisitor {
    type Value = NaiveDateTime;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("an ISO 8601 date-time")
    }

    fn visit_newtype_struct<D: serde::Deserializer<'de>>(
        self,
        de: D,
    ) -> Result<NaiveDateTime, D::Error> {
        de.deserialize_str(self)
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<NaiveDateTime, E> {
        parse(v, &NonStandard::all())
            .ok_or_else(|| E::invalid_value(serde::de::Unexpected::Str(v), &self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2002, 8, 20)
            .and_then(|d| d.and_hms_opt(12, 34, 56))
            .unwrap()
    }

    #[test]
    fn test_canonical_roundtrip() {
        let text = format_canonical(&sample());
        assert_eq!(text, "20020820T12:34:56");
        assert_eq!(parse(&text, &NonStandard::default()), Some(sample()));
    }

    #[test]
    fn test_non_standard_forms_need_flag() {
        let strict = NonStandard::default();
        let lenient = NonStandard {
            allow_non_standard_date_time: true,
            ..NonStandard::default()
        };
        for text in ["2002-08-20T12:34:56", "20020820T12:34:56Z", "2002-08-20T12:34:56Z"] {
            assert_eq!(parse(text, &strict), None, "{}", text);
            assert_eq!(parse(text, &lenient), Some(sample()), "{}", text);
        }
    }

    #[test]
    fn test_zero_sentinel() {
        let compat = NonStandard {
            map_zeros_date_time_to_min_value: true,
            ..NonStandard::default()
        };
        assert_eq!(parse("00000000T00:00:00", &compat), Some(min_value()));
        assert_eq!(parse("0000-00-00T00:00:00Z", &compat), Some(min_value()));
        assert_eq!(parse("00000000T00:00:00", &NonStandard::default()), None);
    }

    #[test]
    fn test_empty_maps_to_min_only_with_flag() {
        let compat = NonStandard {
            map_empty_date_time_to_min_value: true,
            ..NonStandard::default()
        };
        assert_eq!(parse("", &compat), Some(min_value()));
        assert_eq!(parse("", &NonStandard::default()), None);
        assert_eq!(min_value().to_string(), "0001-01-01 00:00:00");
    }
}
