//! Value parsing utilities for completed-request fields
//!
//! Couchbase reports durations as Go duration strings ("1.5ms", "500µs",
//! "2m3.5s") or as integer nanoseconds depending on the server version and
//! on how the dump was produced. Counters may arrive as numbers or as numeric
//! strings, and request timestamps use Go's default time layout.

use crate::services::query_analyzer::parser::error::{ParseError, ParseResult, json_type_name};
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static DURATION_COMPONENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    // Longer units first so "ms" is not read as "m" followed by garbage
    Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|μs|ms|h|m|s)").unwrap()
});

static BYTES_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)\s*(TB|GB|MB|KB|B)?$").unwrap());

const NANOS_PER_MS: f64 = 1_000_000.0;

/// Value parser for completed-request fields
pub struct ValueParser;

impl ValueParser {
    /// Parse a Go duration string to milliseconds
    ///
    /// Every character must belong to a `<number><unit>` component; a string
    /// with an unknown unit is rejected as a whole rather than partially summed.
    ///
    /// # Examples
    /// ```ignore
    /// assert_eq!(ValueParser::parse_duration_ms("2m3.5s").unwrap(), 123_500.0);
    /// ```
    pub fn parse_duration_ms(input: &str) -> ParseResult<f64> {
        let trimmed = input.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        if body.is_empty() {
            return Err(ParseError::ParseDurationError(format!("Empty duration '{}'", input)));
        }

        // Go prints the zero duration without a unit
        if body == "0" {
            return Ok(0.0);
        }

        let mut total_ms = 0.0;
        let mut cursor = 0;

        for cap in DURATION_COMPONENT_REGEX.captures_iter(body) {
            let (Some(whole), Some(number), Some(unit)) = (cap.get(0), cap.get(1), cap.get(2))
            else {
                continue;
            };

            if whole.start() != cursor {
                return Err(ParseError::ParseDurationError(format!(
                    "Unrecognized text '{}' in duration '{}'",
                    &body[cursor..whole.start()],
                    input
                )));
            }
            cursor = whole.end();

            let value: f64 = number.as_str().parse().map_err(|_| {
                ParseError::ParseDurationError(format!(
                    "Invalid number '{}' in duration '{}'",
                    number.as_str(),
                    input
                ))
            })?;

            total_ms += match unit.as_str() {
                "h" => value * 3_600_000.0,
                "m" => value * 60_000.0,
                "s" => value * 1_000.0,
                "ms" => value,
                "us" | "µs" | "μs" => value / 1_000.0,
                "ns" => value / NANOS_PER_MS,
                other => {
                    return Err(ParseError::ParseDurationError(format!(
                        "Unknown unit '{}' in duration '{}'",
                        other, input
                    )));
                },
            };
        }

        if cursor == 0 || cursor != body.len() {
            return Err(ParseError::ParseDurationError(format!(
                "Unrecognized duration '{}'",
                input
            )));
        }

        Ok(if negative { -total_ms } else { total_ms })
    }

    /// Parse a duration field that may be a string or integer nanoseconds
    ///
    /// NaN and infinite results are errors, never values.
    pub fn duration_value_ms(field: &str, value: &Value) -> ParseResult<f64> {
        let ms = Self::raw_duration_value_ms(field, value)?;
        if ms.is_finite() {
            Ok(ms)
        } else {
            Err(ParseError::ParseDurationError(format!("{} is not finite: {}", field, value)))
        }
    }

    fn raw_duration_value_ms(field: &str, value: &Value) -> ParseResult<f64> {
        match value {
            Value::Number(n) => n.as_f64().map(|ns| ns / NANOS_PER_MS).ok_or_else(|| {
                ParseError::ParseNumberError(format!("{} is not representable: {}", field, n))
            }),
            Value::String(s) => {
                // Bare numeric strings carry nanoseconds, like the numeric form
                if let Ok(ns) = s.trim().parse::<f64>() {
                    return Ok(ns / NANOS_PER_MS);
                }
                Self::parse_duration_ms(s)
            },
            other => Err(ParseError::UnexpectedType {
                field: field.to_string(),
                found: json_type_name(other),
            }),
        }
    }

    /// Parse a non-negative counter from a number or numeric string
    ///
    /// Returns `None` for absent, null or unparseable values so callers can
    /// keep "not reported" distinct from a reported zero.
    pub fn count_value(value: &Value) -> Option<u64> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => {
                let cleaned = s.trim().replace(',', "");
                cleaned
                    .parse::<u64>()
                    .ok()
                    .or_else(|| {
                        cleaned
                            .parse::<f64>()
                            .ok()
                            .filter(|f| f.is_finite() && *f >= 0.0)
                            .map(|f| f as u64)
                    })
            },
            _ => None,
        }
    }

    /// Parse a byte count: a number, a numeric string, or a sized string like "1.5MB"
    pub fn bytes_value(value: &Value) -> Option<u64> {
        if let Some(count) = Self::count_value(value) {
            return Some(count);
        }
        value.as_str().and_then(|s| Self::parse_bytes(s).ok())
    }

    /// Parse bytes from a string like "45.9 GB"
    pub fn parse_bytes(input: &str) -> ParseResult<u64> {
        let normalized = input.trim().to_uppercase();
        let cap = BYTES_REGEX.captures(&normalized).ok_or_else(|| {
            ParseError::ParseNumberError(format!("Cannot parse bytes from '{}'", input))
        })?;

        let num: f64 = cap[1].parse().map_err(|_| {
            ParseError::ParseNumberError(format!("Invalid number in bytes '{}'", input))
        })?;

        let multiplier = match cap.get(2).map(|m| m.as_str()) {
            None | Some("B") => 1.0,
            Some("KB") => 1024.0,
            Some("MB") => 1024.0 * 1024.0,
            Some("GB") => 1024.0 * 1024.0 * 1024.0,
            Some("TB") => 1024.0 * 1024.0 * 1024.0 * 1024.0,
            Some(unit) => {
                return Err(ParseError::ParseNumberError(format!("Unknown byte unit: {}", unit)));
            },
        };

        Ok((num * multiplier).floor() as u64)
    }

    /// Parse a request timestamp
    ///
    /// Accepts RFC 3339, Go's default layout ("2024-03-01 10:15:42.123456789 -0800 PST"),
    /// zone-less "YYYY-MM-DD HH:MM:SS" (read as UTC), and numeric epoch seconds or
    /// milliseconds.
    pub fn timestamp_value(value: &Value) -> ParseResult<DateTime<Utc>> {
        match value {
            Value::String(s) => Self::parse_timestamp(s),
            Value::Number(n) => {
                let raw = n.as_f64().ok_or_else(|| {
                    ParseError::ParseTimestampError(format!("Invalid epoch value {}", n))
                })?;
                // Values past year 2286 in seconds are taken as milliseconds
                let millis = if raw.abs() >= 1e10 { raw } else { raw * 1000.0 };
                DateTime::from_timestamp_millis(millis as i64).ok_or_else(|| {
                    ParseError::ParseTimestampError(format!("Epoch value out of range: {}", n))
                })
            },
            other => Err(ParseError::UnexpectedType {
                field: "requestTime".to_string(),
                found: json_type_name(other),
            }),
        }
    }

    pub fn parse_timestamp(input: &str) -> ParseResult<DateTime<Utc>> {
        let trimmed = input.trim();

        if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(ts.with_timezone(&Utc));
        }

        // Go appends the zone abbreviation after the numeric offset
        let without_zone_name = match trimmed.rsplit_once(' ') {
            Some((head, tail)) if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_alphabetic()) => {
                head
            },
            _ => trimmed,
        };

        if let Ok(ts) = DateTime::parse_from_str(without_zone_name, "%Y-%m-%d %H:%M:%S%.f %z") {
            return Ok(ts.with_timezone(&Utc));
        }

        for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(without_zone_name, layout) {
                return Ok(naive.and_utc());
            }
        }

        Err(ParseError::ParseTimestampError(format!("Unrecognized timestamp '{}'", input)))
    }
}
