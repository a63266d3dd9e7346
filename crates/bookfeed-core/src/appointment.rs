//! Appointment records and the builder that assembles them from raw matches.

use std::collections::HashSet;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extract::RawMatch;
use crate::normalize::normalize;

/// Title used when the page offers nothing better.
pub const DEFAULT_TITLE: &str = "Tutoring Session";

/// Venue used when none is configured.
pub const DEFAULT_LOCATION: &str = "Learning Center";

/// A normalized booking.
///
/// `start` and `end` are wall-clock times in the venue's time zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Appointment {
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub location: String,
}

impl Appointment {
    /// Creates a new appointment.
    pub fn new(
        title: impl Into<String>,
        start: NaiveDateTime,
        end: NaiveDateTime,
        location: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            start,
            end,
            location: location.into(),
        }
    }

    /// Returns the scheduled length.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Fallback values applied while building appointments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentDefaults {
    pub title: String,
    pub location: String,
}

impl Default for AppointmentDefaults {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            location: DEFAULT_LOCATION.to_string(),
        }
    }
}

impl AppointmentDefaults {
    /// Builder: set the default title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Builder: set the venue.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }
}

/// Normalizes, deduplicates and orders raw matches.
///
/// Candidates whose date or time cannot be resolved are dropped. Two matches
/// with the same title, start and end collapse into one appointment. The
/// result is sorted by start time; ties keep page order.
pub fn build_appointments(matches: &[RawMatch], defaults: &AppointmentDefaults) -> Vec<Appointment> {
    let mut seen = HashSet::new();
    let mut appointments = Vec::with_capacity(matches.len());

    for raw in matches {
        let (start, end) = match normalize(&raw.date_text, &raw.time) {
            Ok(range) => range,
            Err(e) => {
                debug!(error = %e, date = %raw.date_text, "Dropping candidate");
                continue;
            }
        };

        let title = raw.title.clone().unwrap_or_else(|| defaults.title.clone());
        if !seen.insert((title.clone(), start, end)) {
            debug!(title = %title, start = %start, "Dropping duplicate appointment");
            continue;
        }

        appointments.push(Appointment::new(title, start, end, defaults.location.clone()));
    }

    appointments.sort_by_key(|a| a.start);
    appointments
}
