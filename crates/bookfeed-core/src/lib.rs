//! Core pipeline: pattern matching, extraction, normalization, calendar encoding

pub mod appointment;
pub mod extract;
pub mod ics;
pub mod normalize;
pub mod patterns;
pub mod tracing;

pub use appointment::{
    build_appointments, Appointment, AppointmentDefaults, DEFAULT_LOCATION, DEFAULT_TITLE,
};
pub use extract::{
    CardScanStrategy, CompactLayoutStrategy, DocumentScanStrategy, ExtractionStrategy, Extractor,
    Page, RawMatch,
};
pub use ics::{
    appointment_uid, encode_calendar, local_to_utc, CalendarDocument, CalendarOptions, EncodeError,
};
pub use normalize::{normalize, resolve_date, resolve_time, NormalizeError};
pub use patterns::{ClockTime, DateFamily, DateHit, Meridiem, TimeMatch};
pub use tracing::{init_tracing, TracingConfig, TracingError, TracingOutputFormat};
