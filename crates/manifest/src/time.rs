// Time helpers: human offsets, ISO-8601 durations and datetimes, all in milliseconds.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime};
use regex::Regex;

use crate::error::ParseError;

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;

static NUMBER_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("valid number regex"));

static CLOCK_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:(\d+):)?(\d{1,2}):)?(\d{1,2})(?:\.(\d{3}))?$").expect("valid clock regex")
});

static UNIT_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d+)(ms|s|m|h)").expect("valid unit regex"));

static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^P(?:(\d+(?:\.\d+)?)D)?(?:T(?:(\d+(?:\.\d+)?)H)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)S)?)?$",
    )
    .expect("valid ISO duration regex")
});

/// Parses a human readable offset into milliseconds.
///
/// Accepted forms:
/// - plain milliseconds: `"1000"`
/// - clock time: `"1:30.123"`, `"01:05:30"`
/// - unit sums: `"2h10s500ms"`, `"1m"`
pub fn parse_human_time(input: &str) -> Result<u64, ParseError> {
    let input = input.trim();

    if NUMBER_FORMAT.is_match(input) {
        return input
            .parse()
            .map_err(|_| ParseError::InvalidTime(input.to_owned()));
    }

    if let Some(caps) = CLOCK_FORMAT.captures(input) {
        let invalid = || ParseError::InvalidTime(input.to_owned());
        let mut total: u64 = 0;
        for (idx, unit) in [(1, MS_PER_HOUR), (2, MS_PER_MINUTE), (3, MS_PER_SECOND), (4, 1)] {
            let Some(field) = caps.get(idx) else {
                continue;
            };
            let value: u64 = field.as_str().parse().map_err(|_| invalid())?;
            total = value
                .checked_mul(unit as u64)
                .and_then(|ms| total.checked_add(ms))
                .ok_or_else(invalid)?;
        }
        return Ok(total);
    }

    let mut matched = false;
    let mut total: i64 = 0;
    for caps in UNIT_FORMAT.captures_iter(input) {
        matched = true;
        let value: i64 = caps[1]
            .parse()
            .map_err(|_| ParseError::InvalidTime(input.to_owned()))?;
        let unit = match &caps[2] {
            "ms" => 1,
            "s" => MS_PER_SECOND,
            "m" => MS_PER_MINUTE,
            _ => MS_PER_HOUR,
        };
        total = total.saturating_add(value.saturating_mul(unit));
    }

    if !matched {
        return Err(ParseError::InvalidTime(input.to_owned()));
    }
    u64::try_from(total).map_err(|_| ParseError::InvalidTime(input.to_owned()))
}

/// Parses an ISO-8601 duration such as `PT1H2M3.5S` into milliseconds.
pub fn parse_iso_duration(input: &str) -> Result<f64, ParseError> {
    let input = input.trim();
    let caps = ISO_DURATION
        .captures(input)
        .ok_or_else(|| ParseError::InvalidDuration(input.to_owned()))?;

    let field = |idx: usize| -> f64 {
        caps.get(idx)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    Ok(field(1) * 24.0 * MS_PER_HOUR as f64
        + field(2) * MS_PER_HOUR as f64
        + field(3) * MS_PER_MINUTE as f64
        + field(4) * MS_PER_SECOND as f64)
}

/// Parses an ISO-8601 / RFC-3339 datetime into milliseconds since the Unix epoch.
///
/// Datetimes without a zone designator are taken as UTC.
pub fn parse_datetime(input: &str) -> Result<i64, ParseError> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|dt| dt.and_utc().timestamp_millis())
        .map_err(|e| ParseError::InvalidDateTime {
            input: input.to_owned(),
            reason: e.to_string(),
        })
}
