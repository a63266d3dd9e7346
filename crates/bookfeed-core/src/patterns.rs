//! Date and time pattern families used by the extractor.
//!
//! Dates come in three families, tried in order:
//! 1. weekday + month + day + year (`Monday, January 15, 2026`)
//! 2. month + day + year (`Jan 15th, 2026`)
//! 3. numeric `M/D/Y` with a 2- or 4-digit year (`1/5/26`)
//!
//! Times are `H:MM` with an optional meridiem, optionally followed by a range
//! separator and a second `H:MM`.

use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

const WEEKDAYS: &str =
    "monday|tuesday|wednesday|thursday|friday|saturday|sunday|mon|tues|tue|wed|thurs|thur|thu|fri|sat|sun";

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";

static WEEKDAY_DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:{WEEKDAYS})\.?\s*,?\s+(?:{MONTHS})\.?\s+\d{{1,2}}(?:st|nd|rd|th)?\s*,?\s*\d{{4}}\b"
    ))
    .expect("Invalid weekday date regex")
});

static MONTH_DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:{MONTHS})\.?\s+\d{{1,2}}(?:st|nd|rd|th)?\s*,?\s*\d{{4}}\b"
    ))
    .expect("Invalid month date regex")
});

static NUMERIC_DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,2}/\d{1,2}/(?:\d{4}|\d{2})\b").expect("Invalid numeric date regex")
});

static TIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2}):(\d{2})\s*(?:([ap])\.?m\b\.?)?(?:\s*(?:-|–|—|to)\s*(\d{1,2}):(\d{2})\s*(?:([ap])\.?m\b\.?)?)?",
    )
    .expect("Invalid time regex")
});

/// Morning or afternoon marker attached to a 12-hour clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Meridiem {
    Am,
    Pm,
}

impl Meridiem {
    /// Parses `am`, `pm`, `a.m.`, `P` and friends, ignoring case.
    pub fn parse(s: &str) -> Option<Self> {
        let cleaned: String = s
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match cleaned.as_str() {
            "a" | "am" => Some(Self::Am),
            "p" | "pm" => Some(Self::Pm),
            _ => None,
        }
    }
}

/// A clock reading as written on the page, before 24-hour conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
    pub meridiem: Option<Meridiem>,
}

impl ClockTime {
    pub fn new(hour: u32, minute: u32, meridiem: Option<Meridiem>) -> Self {
        Self {
            hour,
            minute,
            meridiem,
        }
    }
}

/// A located time, optionally with the end of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeMatch {
    pub start: ClockTime,
    pub end: Option<ClockTime>,
}

impl TimeMatch {
    pub fn single(start: ClockTime) -> Self {
        Self { start, end: None }
    }

    pub fn range(start: ClockTime, end: ClockTime) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }
}

/// Which family a located date belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateFamily {
    WeekdayMonthDayYear,
    MonthDayYear,
    Numeric,
}

impl DateFamily {
    /// All families in priority order.
    pub const ALL: [DateFamily; 3] = [
        DateFamily::WeekdayMonthDayYear,
        DateFamily::MonthDayYear,
        DateFamily::Numeric,
    ];

    fn regex(self) -> &'static Regex {
        match self {
            Self::WeekdayMonthDayYear => &WEEKDAY_DATE_REGEX,
            Self::MonthDayYear => &MONTH_DATE_REGEX,
            Self::Numeric => &NUMERIC_DATE_REGEX,
        }
    }
}

/// A date substring located in some text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateHit {
    pub text: String,
    pub span: Range<usize>,
    pub family: DateFamily,
}

/// Finds the first date in `text`, trying each family in priority order.
pub fn find_date(text: &str) -> Option<DateHit> {
    DateFamily::ALL.iter().find_map(|family| {
        family.regex().find(text).map(|m| DateHit {
            text: m.as_str().to_string(),
            span: m.range(),
            family: *family,
        })
    })
}

/// Finds every date occurrence in `text`, in document order.
///
/// Occurrences found by a lower-priority family that overlap one found by a
/// higher-priority family are ignored, so `Monday, Jan 5, 2026` yields one hit.
pub fn find_all_dates(text: &str) -> Vec<DateHit> {
    let mut hits: Vec<DateHit> = Vec::new();
    for family in DateFamily::ALL {
        for m in family.regex().find_iter(text) {
            let span = m.range();
            let overlaps = hits
                .iter()
                .any(|h| span.start < h.span.end && h.span.start < span.end);
            if !overlaps {
                hits.push(DateHit {
                    text: m.as_str().to_string(),
                    span,
                    family,
                });
            }
        }
    }
    hits.sort_by_key(|h| h.span.start);
    hits
}

/// Finds the first time (or time range) in `text`.
pub fn find_time(text: &str) -> Option<(TimeMatch, Range<usize>)> {
    TIME_REGEX
        .captures_iter(text)
        .find_map(|caps| time_from_captures(&caps))
}

/// Finds the last time (or time range) in `text`.
pub fn find_last_time(text: &str) -> Option<(TimeMatch, Range<usize>)> {
    TIME_REGEX
        .captures_iter(text)
        .filter_map(|caps| time_from_captures(&caps))
        .last()
}

fn time_from_captures(caps: &Captures<'_>) -> Option<(TimeMatch, Range<usize>)> {
    let whole = caps.get(0)?;
    let start = clock_from(caps, 1, 2, 3)?;
    let end = clock_from(caps, 4, 5, 6);
    let time = match end {
        Some(end) => TimeMatch::range(start, end),
        None => TimeMatch::single(start),
    };
    Some((time, whole.range()))
}

fn clock_from(caps: &Captures<'_>, hour: usize, minute: usize, meridiem: usize) -> Option<ClockTime> {
    let hour = caps.get(hour)?.as_str().parse().ok()?;
    let minute = caps.get(minute)?.as_str().parse().ok()?;
    let meridiem = caps.get(meridiem).and_then(|m| Meridiem::parse(m.as_str()));
    Some(ClockTime::new(hour, minute, meridiem))
}

/// Returns true if `word` names a day of the week (full or abbreviated).
pub fn is_weekday(word: &str) -> bool {
    let lower = word.trim_end_matches(['.', ',']).to_ascii_lowercase();
    WEEKDAYS.split('|').any(|w| w == lower)
}
