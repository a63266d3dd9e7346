//! iCalendar encoding of appointments.
//!
//! Each appointment becomes one VEVENT whose UID is a content hash of its
//! title, start and end, so regenerating the same bookings yields the same
//! identifiers. Line folding and escaping are left to the `icalendar` crate.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{Alarm, Calendar, Component, Event, EventLike, Property};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::appointment::Appointment;

/// Domain suffix appended to every event UID.
pub const UID_DOMAIN: &str = "bookfeed";

/// Refresh hint advertised to subscribing clients.
pub const REFRESH_INTERVAL: &str = "PT1H";

/// Reminder offsets before start, in minutes.
pub const REMINDER_MINUTES: [i64; 2] = [60, 24 * 60];

/// Errors raised while preparing a calendar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("unknown time zone: {0}")]
    UnknownTimezone(String),
}

/// Calendar-level settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarOptions {
    /// Display name shown by calendar clients.
    pub name: String,
    /// Zone the page's wall-clock times are expressed in.
    pub timezone: Tz,
}

impl CalendarOptions {
    /// Creates options from a display name and an IANA zone name.
    pub fn new(name: impl Into<String>, timezone: &str) -> Result<Self, EncodeError> {
        let timezone = timezone
            .parse::<Tz>()
            .map_err(|_| EncodeError::UnknownTimezone(timezone.to_string()))?;
        Ok(Self {
            name: name.into(),
            timezone,
        })
    }
}

/// A rendered calendar feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDocument {
    name: String,
    timezone: Tz,
    generated_at: DateTime<Utc>,
    event_count: usize,
    body: String,
}

impl CalendarDocument {
    /// Display name of the calendar.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Zone the events were written for.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// When the document was generated.
    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Number of VEVENTs in the document.
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// The iCalendar text.
    pub fn as_str(&self) -> &str {
        &self.body
    }

    /// Consumes the document, returning the iCalendar text.
    pub fn into_string(self) -> String {
        self.body
    }
}

/// Computes the stable identifier for an appointment.
pub fn appointment_uid(appointment: &Appointment) -> String {
    let mut hasher = Sha256::new();
    hasher.update(appointment.title.as_bytes());
    hasher.update(b"|");
    hasher.update(iso(&appointment.start).as_bytes());
    hasher.update(b"|");
    hasher.update(iso(&appointment.end).as_bytes());
    format!("{}@{}", hex::encode(hasher.finalize()), UID_DOMAIN)
}

/// Encodes appointments into a calendar document.
///
/// `generated_at` becomes every event's DTSTAMP.
pub fn encode_calendar(
    appointments: &[Appointment],
    options: &CalendarOptions,
    generated_at: DateTime<Utc>,
) -> CalendarDocument {
    let mut calendar = Calendar::new();
    calendar
        .name(&options.name)
        .timezone(options.timezone.name());
    calendar.append_property(
        Property::new("REFRESH-INTERVAL", REFRESH_INTERVAL)
            .add_parameter("VALUE", "DURATION")
            .done(),
    );
    calendar.append_property(Property::new("X-PUBLISHED-TTL", REFRESH_INTERVAL));

    for appointment in appointments {
        calendar.push(encode_event(appointment, &options.timezone, generated_at));
    }

    debug!(
        calendar = %options.name,
        events = appointments.len(),
        "Encoded calendar"
    );

    CalendarDocument {
        name: options.name.clone(),
        timezone: options.timezone,
        generated_at,
        event_count: appointments.len(),
        body: calendar.done().to_string(),
    }
}

fn encode_event(appointment: &Appointment, tz: &Tz, generated_at: DateTime<Utc>) -> Event {
    let uid = appointment_uid(appointment);
    let mut event = Event::new();
    event
        .uid(&uid)
        .summary(&appointment.title)
        .location(&appointment.location)
        .starts(local_to_utc(appointment.start, tz))
        .ends(local_to_utc(appointment.end, tz))
        .timestamp(generated_at);

    // Alarms left without UID/DTSTAMP get a random UUID and the wall clock.
    for minutes in REMINDER_MINUTES {
        let alarm = Alarm::display(
            &format!("Reminder: {}", appointment.title),
            -Duration::minutes(minutes),
        )
        .uid(&format!("{uid}-{minutes}m"))
        .timestamp(generated_at)
        .done();
        event.alarm(alarm);
    }

    event.done()
}

/// Resolves a wall-clock time in `tz` to UTC.
///
/// Ambiguous times take the earlier instant; times inside a DST gap are
/// moved forward one hour.
pub fn local_to_utc(local: NaiveDateTime, tz: &Tz) -> DateTime<Utc> {
    if let Some(dt) = tz.from_local_datetime(&local).earliest() {
        return dt.with_timezone(&Utc);
    }

    let shifted = local + Duration::hours(1);
    match tz.from_local_datetime(&shifted).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => {
            warn!(local = %local, tz = %tz.name(), "Unresolvable local time, treating as UTC");
            Utc.from_utc_datetime(&local)
        }
    }
}

fn iso(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn sample() -> Appointment {
        Appointment::new(
            "Algebra Review",
            at(2026, 1, 15, 16, 0),
            at(2026, 1, 15, 17, 0),
            "Learning Center",
        )
    }

    fn options() -> CalendarOptions {
        CalendarOptions::new("Tutoring", "America/New_York").unwrap()
    }

    fn unfold(text: &str) -> String {
        text.replace("\r\n ", "").replace("\r\n\t", "")
    }

    fn generated() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn uid_is_pinned() {
        // sha256("Algebra Review|2026-01-15T16:00:00|2026-01-15T17:00:00")
        assert_eq!(
            appointment_uid(&sample()),
            "fbc9e7077a46065ccd3e74ee1f46868da3e6a9bc28bcd724ecdd3edbe6a95dd0@bookfeed"
        );
    }

    #[test]
    fn uid_ignores_location() {
        let mut moved = sample();
        moved.location = "Elsewhere".to_string();
        assert_eq!(appointment_uid(&sample()), appointment_uid(&moved));
    }

    #[test]
    fn uid_differs_for_distinct_content() {
        let base = sample();
        let mut retitled = sample();
        retitled.title = "Geometry".to_string();
        let mut later = sample();
        later.end = at(2026, 1, 15, 17, 30);

        let uids = [
            appointment_uid(&base),
            appointment_uid(&retitled),
            appointment_uid(&later),
        ];
        assert_ne!(uids[0], uids[1]);
        assert_ne!(uids[0], uids[2]);
        assert_ne!(uids[1], uids[2]);
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert_eq!(
            CalendarOptions::new("x", "Mars/Olympus"),
            Err(EncodeError::UnknownTimezone("Mars/Olympus".to_string()))
        );
    }

    #[test]
    fn document_contents() {
        let doc = encode_calendar(&[sample()], &options(), generated());
        let text = unfold(doc.as_str());

        assert_eq!(doc.event_count(), 1);
        assert_eq!(doc.name(), "Tutoring");
        assert!(text.starts_with("BEGIN:VCALENDAR"));
        assert!(text.contains("X-WR-CALNAME:Tutoring"));
        assert!(text.contains("X-WR-TIMEZONE:America/New_York"));
        assert!(text.contains("REFRESH-INTERVAL;VALUE=DURATION:PT1H"));
        assert!(text.contains("X-PUBLISHED-TTL:PT1H"));
        assert!(text.contains("SUMMARY:Algebra Review"));
        assert!(text.contains("LOCATION:Learning Center"));
        // 16:00 EST is 21:00 UTC
        assert!(text.contains("DTSTART:20260115T210000Z"));
        assert!(text.contains("DTEND:20260115T220000Z"));
        assert!(text.contains(&format!("UID:{}", appointment_uid(&sample()))));
        assert_eq!(text.matches("BEGIN:VALARM").count(), 2);
        assert_eq!(text.matches("TRIGGER").count(), 2);
        assert!(text.contains("Reminder: Algebra Review"));
    }

    #[test]
    fn empty_calendar_is_valid() {
        let doc = encode_calendar(&[], &options(), generated());
        assert_eq!(doc.event_count(), 0);
        assert!(doc.as_str().contains("BEGIN:VCALENDAR"));
        assert!(doc.as_str().contains("END:VCALENDAR"));
        assert!(!doc.as_str().contains("BEGIN:VEVENT"));
    }

    #[test]
    fn regeneration_is_stable() {
        let first = encode_calendar(&[sample()], &options(), generated());
        let second = encode_calendar(&[sample()], &options(), generated());
        assert_eq!(first.as_str(), second.as_str());
    }

    #[test]
    fn alarms_are_deterministic() {
        let doc = encode_calendar(&[sample()], &options(), generated());
        let text = unfold(doc.as_str());
        let uid = appointment_uid(&sample());

        assert!(text.contains(&format!("UID:{uid}-60m")));
        assert!(text.contains(&format!("UID:{uid}-1440m")));
        // event + two alarms, all stamped with the generation time
        assert_eq!(text.matches("DTSTAMP:20260110T120000Z").count(), 3);
        assert_eq!(text.matches("DTSTAMP:").count(), 3);
    }

    #[test]
    fn dst_gap_moves_forward() {
        // 2:30 AM does not exist in New York on 2026-03-08
        let tz: Tz = "America/New_York".parse().unwrap();
        let utc = local_to_utc(at(2026, 3, 8, 2, 30), &tz);
        assert_eq!(utc, Utc.with_ymd_and_hms(2026, 3, 8, 7, 30, 0).unwrap());
    }

    #[test]
    fn ambiguous_time_takes_earliest() {
        // 1:30 AM happens twice in New York on 2026-11-01
        let tz: Tz = "America/New_York".parse().unwrap();
        let utc = local_to_utc(at(2026, 11, 1, 1, 30), &tz);
        assert_eq!(utc, Utc.with_ymd_and_hms(2026, 11, 1, 5, 30, 0).unwrap());
    }
}
