// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Watch options and their wire form.
//
// On the wire a timeout is a duration string such as "300ms", "5s" or
// "1m30s". A bare integer is accepted as nanoseconds for older clients.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Per-subscription delivery options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchOptions {
    /// Only report changes to the watched document itself.
    pub self_only: bool,
    /// Stop after this many events; `0` is unbounded.
    pub max_events: u64,
    /// Stop after this long; zero is unbounded.
    #[serde(with = "duration_string")]
    pub timeout: Duration,
    /// Suppress updates whose changed fields do not touch this path.
    pub must_diff: String,
}

impl WatchOptions {
    pub fn with_max_events(mut self, max_events: u64) -> Self {
        self.max_events = max_events;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_must_diff(mut self, path: impl Into<String>) -> Self {
        self.must_diff = path.into();
        self
    }

    pub fn with_self_only(mut self, self_only: bool) -> Self {
        self.self_only = self_only;
        self
    }
}

/// Body of a watch request: options plus an optional selector expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRequest {
    #[serde(flatten)]
    pub options: WatchOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl From<WatchOptions> for WatchRequest {
    fn from(options: WatchOptions) -> Self {
        Self {
            options,
            selector: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Duration strings
// ---------------------------------------------------------------------------

/// Errors from [`parse_duration`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration '{0}'")]
    Invalid(String),
    #[error("unknown unit '{unit}' in duration '{input}'")]
    UnknownUnit { unit: String, input: String },
}

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        _ => return None,
    })
}

const MAX_FRACTION_DIGITS: usize = 18;

/// Parse a duration string (`"1h2m3.5s"`, `"300ms"`, `"0"`).
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(DurationError::Empty);
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = || DurationError::Invalid(input.to_string());
    let mut total: u128 = 0;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        total = whole
            .checked_mul(scale)
            .and_then(|nanos| total.checked_add(nanos))
            .ok_or_else(invalid)?;
        if !frac.is_empty() {
            // Digits past nanosecond precision of the largest unit are dropped.
            let frac = &frac[..frac.len().min(MAX_FRACTION_DIGITS)];
            let digits: u32 = frac.len().try_into().map_err(|_| invalid())?;
            let frac_value: u128 = frac.parse().map_err(|_| invalid())?;
            let divisor = 10u128.checked_pow(digits).ok_or_else(invalid)?;
            total = frac_value
                .checked_mul(scale)
                .map(|nanos| nanos / divisor)
                .and_then(|nanos| total.checked_add(nanos))
                .ok_or_else(invalid)?;
        }
        rest = tail;
    }

    let nanos: u64 = total.try_into().map_err(|_| invalid())?;
    Ok(Duration::from_nanos(nanos))
}

/// Render a duration the way [`parse_duration`] reads it.
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000_000_000 {
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}µs", nanos / 1_000)
        } else {
            format!("{nanos}ns")
        };
    }

    let hours = nanos / 3_600_000_000_000;
    let minutes = (nanos / 60_000_000_000) % 60;
    let sub_minute = nanos % 60_000_000_000;
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    let seconds = sub_minute / 1_000_000_000;
    let fraction = sub_minute % 1_000_000_000;
    if fraction == 0 {
        out.push_str(&format!("{seconds}s"));
    } else {
        let digits = format!("{fraction:09}");
        out.push_str(&format!("{seconds}.{}s", digits.trim_end_matches('0')));
    }
    out
}

mod duration_string {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a duration string or integer nanoseconds")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            parse_duration(value).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_nanos(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
            u64::try_from(value)
                .map(Duration::from_nanos)
                .map_err(|_| E::custom("negative duration"))
        }

        fn visit_unit<E: de::Error>(self) -> Result<Duration, E> {
            Ok(Duration::ZERO)
        }
    }
}
