use chrono::{DateTime, NaiveDate};

use crate::error::ConfigError;

const OPEN: &str = "..";

/// Checks a STAC datetime parameter: a single RFC 3339 timestamp or date, or
/// an interval `start/end` where either end may be `..`.
pub fn validate_datetime_range(s: &str) -> Result<(), ConfigError> {
    let invalid = |why: &str| ConfigError::InvalidDatetime(s.to_string(), why.to_string());

    let parts = s.split('/').map(str::trim).collect::<Vec<_>>();
    match parts.as_slice() {
        [single] if *single != OPEN => parse_instant(single)
            .map(|_| ())
            .map_err(|e| invalid(&e)),
        [start, end] => {
            if *start == OPEN && *end == OPEN {
                return Err(invalid("interval cannot be open on both ends"));
            }
            let start = match *start {
                OPEN => None,
                value => Some(parse_instant(value).map_err(|e| invalid(&e))?),
            };
            let end = match *end {
                OPEN => None,
                value => Some(parse_instant(value).map_err(|e| invalid(&e))?),
            };
            if let (Some(start), Some(end)) = (start, end) {
                if start > end {
                    return Err(invalid("interval ends before it starts"));
                }
            }
            Ok(())
        }
        _ => Err(invalid("expected a timestamp or a 'start/end' interval")),
    }
}

fn parse_instant(value: &str) -> Result<i64, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(|| format!("'{value}' is not an RFC 3339 timestamp or date"))
}
