//! Date/time normalization.
//!
//! Turns a located date substring and a [`TimeMatch`] into concrete local
//! start/end timestamps. Times are wall-clock readings in the venue's zone;
//! conversion to UTC happens in the encoder.

use std::sync::LazyLock;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use thiserror::Error;

use crate::patterns::{ClockTime, Meridiem, TimeMatch, is_weekday};

/// Length in minutes of an appointment whose source text has no end time.
pub const DEFAULT_DURATION_MINUTES: i64 = 60;

static ORDINAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").expect("Invalid ordinal regex")
});

/// Errors raised while normalizing a single candidate.
///
/// Callers drop the candidate; none of these abort a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// Neither the named-month parser nor the numeric decomposition succeeded.
    #[error("could not resolve date from {0:?}")]
    UnresolvedDate(String),

    /// Hour or minute out of range after 24-hour conversion.
    #[error("invalid time {hour}:{minute:02}")]
    InvalidTime { hour: u32, minute: u32 },
}

/// Resolves a date substring into a calendar date.
///
/// Named-month forms are parsed directly; `M/D/Y` and `M-D-Y` are decomposed
/// explicitly with 2-digit years expanded into the 2000s.
pub fn resolve_date(text: &str) -> Result<NaiveDate, NormalizeError> {
    parse_named_date(text)
        .or_else(|| parse_numeric_date(text))
        .ok_or_else(|| NormalizeError::UnresolvedDate(text.to_string()))
}

fn parse_named_date(text: &str) -> Option<NaiveDate> {
    let without_commas = text.replace(',', " ");
    let without_ordinals = ORDINAL_REGEX.replace_all(&without_commas, "$1");

    let mut tokens: Vec<String> = without_ordinals
        .split_whitespace()
        .map(|t| t.trim_end_matches('.').to_string())
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.first().is_some_and(|t| is_weekday(t)) {
        tokens.remove(0);
    }

    if let [single] = tokens.as_slice() {
        if single.len() != 10 {
            return None;
        }
        return NaiveDate::parse_from_str(single, "%Y-%m-%d").ok();
    }

    let [month, day, year] = tokens.as_slice() else {
        return None;
    };

    // %B takes full names and 3-letter abbreviations, not "sept"
    let month = if month.eq_ignore_ascii_case("sept") {
        "sep"
    } else {
        month.as_str()
    };

    let format = match year.len() {
        2 => "%B %d %y",
        4 => "%B %d %Y",
        _ => return None,
    };

    NaiveDate::parse_from_str(&format!("{month} {day} {year}"), format).ok()
}

fn parse_numeric_date(text: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = text.trim().split(['/', '-']).map(str::trim).collect();
    let [month, day, year] = parts.as_slice() else {
        return None;
    };

    if ![month, day, year]
        .iter()
        .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }

    let year: i32 = match year.len() {
        2 => format!("20{year}").parse().ok()?,
        4 => year.parse().ok()?,
        _ => return None,
    };

    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
}

/// Converts a 12-hour reading to a 24-hour hour.
///
/// `PM` adds 12 unless the hour is 12; `12 AM` becomes 0; anything else,
/// including a missing meridiem, is returned unchanged.
pub fn to_24_hour(hour: u32, meridiem: Option<Meridiem>) -> u32 {
    match meridiem {
        Some(Meridiem::Pm) if hour != 12 => hour + 12,
        Some(Meridiem::Am) if hour == 12 => 0,
        _ => hour,
    }
}

/// Resolves a clock reading into a time of day.
pub fn resolve_time(clock: &ClockTime) -> Result<NaiveTime, NormalizeError> {
    let hour = to_24_hour(clock.hour, clock.meridiem);
    NaiveTime::from_hms_opt(hour, clock.minute, 0).ok_or(NormalizeError::InvalidTime {
        hour,
        minute: clock.minute,
    })
}

/// Normalizes a date substring and time match into `(start, end)`.
///
/// Without an end time the appointment lasts [`DEFAULT_DURATION_MINUTES`]. An end
/// reading earlier than the start stays on the same date.
pub fn normalize(
    date_text: &str,
    time: &TimeMatch,
) -> Result<(NaiveDateTime, NaiveDateTime), NormalizeError> {
    let date = resolve_date(date_text)?;
    let start = date.and_time(resolve_time(&time.start)?);
    let end = match time.end {
        // TODO: decide with the venue whether ranges like 11:30 PM - 12:15 AM roll over
        Some(end) => date.and_time(resolve_time(&end)?),
        None => start + Duration::minutes(DEFAULT_DURATION_MINUTES),
    };
    Ok((start, end))
}
