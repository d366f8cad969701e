//! Meeting scheduling: slot reservation, calendar reconciliation, follow-ups,
//! and the periodic job runner that drives the latter two.
//!
//! Slot dates and times are `YYYY-MM-DD` / `HH:MM` strings end to end; meeting
//! start times use the `YYYY-MM-DDTHH:MM:SS` form. All wall-clock values are
//! UTC.

pub mod followup;
pub mod jobs;
pub mod reconciler;
pub mod reservation;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};

/// Formats a UTC instant as the stored meeting timestamp.
pub fn storage_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Weekday name in the deployment locale.
pub fn weekday_pt(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "segunda-feira",
        Weekday::Tue => "terça-feira",
        Weekday::Wed => "quarta-feira",
        Weekday::Thu => "quinta-feira",
        Weekday::Fri => "sexta-feira",
        Weekday::Sat => "sábado",
        Weekday::Sun => "domingo",
    }
}

/// Parses a `YYYY-MM-DD` date and `HH:MM` time into a UTC instant.
pub fn parse_slot_datetime(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M").ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

/// Splits a stored meeting timestamp into its slot date and time keys.
pub fn split_storage_timestamp(value: &str) -> Option<(&str, &str)> {
    let (date, rest) = value.split_once('T')?;
    let time = rest.get(..5)?;
    Some((date, time))
}
