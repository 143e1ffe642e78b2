//! Date windows for discover queries.
//!
//! A query is scoped either by an explicit `start`/`end` pair or by a
//! relative `range` token such as `1d` (the trailing day). Supplying both is
//! rejected.

use crate::Timestamp;
use regex::Regex;
use std::sync::OnceLock;

/// Relative range failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("Invalid range value '{value}': expected a number followed by one of s, m, h, d, w")]
    InvalidFormat { value: String },

    #[error("Range '{value}' must be greater than zero")]
    Empty { value: String },

    #[error("Range '{value}' is too large")]
    Overflow { value: String },

    #[error("Invalid {field} date '{value}'")]
    InvalidDate { field: &'static str, value: String },

    #[error("Either start and end dates or range is required, not both")]
    Conflicting,

    #[error("Both start and end dates are required")]
    Incomplete,

    #[error("A date range is required: supply start and end, or range")]
    Missing,

    #[error("Start date must be before end date")]
    Inverted,
}

fn range_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([0-9]+)([smhdw]?)$").expect("range pattern is valid"))
}

/// Parse a relative range token into a duration
///
/// Units are `s`, `m`, `h`, `d` and `w`; a bare number means seconds.
pub fn parse_relative_range(token: &str) -> Result<chrono::Duration, RangeError> {
    let invalid = || RangeError::InvalidFormat {
        value: token.to_string(),
    };

    let captures = range_pattern().captures(token.trim()).ok_or_else(invalid)?;
    let amount: i64 = captures[1].parse().map_err(|_| RangeError::Overflow {
        value: token.to_string(),
    })?;

    if amount == 0 {
        return Err(RangeError::Empty {
            value: token.to_string(),
        });
    }

    let seconds_per_unit: i64 = match &captures[2] {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        "w" => 7 * 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    amount
        .checked_mul(seconds_per_unit)
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| RangeError::Overflow {
            value: token.to_string(),
        })
}

/// Half-open time window `[start, end)` applied to event timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl DateWindow {
    /// Build an explicit window
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, RangeError> {
        if start >= end {
            return Err(RangeError::Inverted);
        }
        Ok(Self { start, end })
    }

    /// Window covering the trailing `range` up to `now`
    pub fn trailing(range: &str, now: Timestamp) -> Result<Self, RangeError> {
        let duration = parse_relative_range(range)?;
        Ok(Self {
            start: now.saturating_sub(duration),
            end: now,
        })
    }

    /// Resolve the date parameters of a request into a window
    pub fn resolve(
        start: Option<&str>,
        end: Option<&str>,
        range: Option<&str>,
        now: Timestamp,
    ) -> Result<Self, RangeError> {
        match (start, end, range) {
            (None, None, Some(range)) => Self::trailing(range, now),
            (Some(_), _, Some(_)) | (_, Some(_), Some(_)) => Err(RangeError::Conflicting),
            (Some(start), Some(end), None) => {
                let start = parse_date("start", start)?;
                let end = parse_date("end", end)?;
                Self::new(start, end)
            }
            (Some(_), None, None) | (None, Some(_), None) => Err(RangeError::Incomplete),
            (None, None, None) => Err(RangeError::Missing),
        }
    }

    pub fn contains(&self, ts: &Timestamp) -> bool {
        *ts >= self.start && *ts < self.end
    }
}

fn parse_date(field: &'static str, value: &str) -> Result<Timestamp, RangeError> {
    Timestamp::parse_lenient(value).map_err(|_| RangeError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
#[path = "range_tests.rs"]
mod tests;
