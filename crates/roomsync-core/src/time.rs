//! Time types for availability.
//!
//! This module provides [`EventTime`] for decoded ICS start/end values
//! (either a specific instant or a whole day), [`DayRange`] for half-open
//! day spans, and [`DisplayZone`] for converting between the property's
//! display timezone and UTC storage.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default display timezone for the property.
pub const DEFAULT_DISPLAY_TIMEZONE: &str = "Asia/Manila";

/// Errors raised while resolving a display timezone.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    /// The timezone name is not a known IANA zone.
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// A decoded ICS date value.
///
/// - **DateTime**: a timestamp token, stored as the literal UTC instant
/// - **AllDay**: an 8-digit date token; a day, never shifted by timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EventTime {
    /// A specific instant, stored in UTC.
    DateTime(DateTime<Utc>),
    /// A whole calendar day.
    AllDay(NaiveDate),
}

impl EventTime {
    /// Returns `true` if this is an all-day value.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// Returns the instant this value denotes in UTC.
    ///
    /// All-day values denote UTC midnight of their day.
    pub fn to_utc_datetime(&self) -> DateTime<Utc> {
        match self {
            Self::DateTime(dt) => *dt,
            Self::AllDay(date) => date.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    /// Returns the value one calendar day earlier.
    ///
    /// Returns `None` only at the lower bound of the date range.
    pub fn previous_day(&self) -> Option<Self> {
        match self {
            Self::DateTime(dt) => dt.checked_sub_signed(Duration::days(1)).map(Self::DateTime),
            Self::AllDay(date) => date.pred_opt().map(Self::AllDay),
        }
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_utc_datetime().cmp(&other.to_utc_datetime())
    }
}

/// A half-open span of display days `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayRange {
    /// First occupied day.
    pub start: NaiveDate,
    /// First free day after the span.
    pub end: NaiveDate,
}

impl DayRange {
    /// Creates a new day range.
    ///
    /// # Panics
    ///
    /// Panics if `start` is after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        assert!(start <= end, "DayRange start must be <= end");
        Self { start, end }
    }

    /// Builds a range from an inclusive last day.
    pub fn from_inclusive(start: NaiveDate, last: NaiveDate) -> Self {
        let end = last.succ_opt().unwrap_or(last);
        Self::new(start, end.max(start))
    }

    /// Returns `true` if the two ranges share at least one day.
    ///
    /// `[s, e)` conflicts with `[cs, ce)` iff `cs < e && ce > s`.
    pub fn overlaps(&self, other: &DayRange) -> bool {
        other.start < self.end && other.end > self.start
    }

    /// Returns `true` if `day` lies inside the range.
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }

    /// Number of nights covered.
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

impl fmt::Display for DayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// The fixed timezone used when presenting or accepting user-entered dates.
///
/// Conversions are symmetric: `to_storage(to_display(x)) == x` for every
/// instant `x` that is the start of a display day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayZone(Tz);

impl Default for DisplayZone {
    fn default() -> Self {
        Self(chrono_tz::Asia::Manila)
    }
}

impl DisplayZone {
    /// Wraps an IANA timezone.
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    /// Returns the wrapped timezone.
    pub fn tz(&self) -> Tz {
        self.0
    }

    /// Returns the IANA name of the zone.
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Wall-clock time in the display zone for a stored instant.
    pub fn to_display(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.0).naive_local()
    }

    /// Stored instant for a display-zone wall-clock time.
    ///
    /// Ambiguous times resolve to the earlier instant. Times inside a
    /// daylight-saving gap resolve to the first valid time after the gap.
    pub fn to_storage(&self, local: NaiveDateTime) -> DateTime<Utc> {
        match self.0.from_local_datetime(&local) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => {
                let mut probe = local;
                for _ in 0..(24 * 4) {
                    probe += Duration::minutes(15);
                    if let Some(dt) = self.0.from_local_datetime(&probe).earliest() {
                        return dt.with_timezone(&Utc);
                    }
                }
                Utc.from_utc_datetime(&local)
            }
        }
    }

    /// The display day an instant falls on.
    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.to_display(instant).date()
    }

    /// The stored instant at which a display day begins.
    pub fn day_start(&self, day: NaiveDate) -> DateTime<Utc> {
        self.to_storage(day.and_time(NaiveTime::MIN))
    }

    /// Today's display day.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.day_of(now)
    }

    /// The display day of a decoded ICS value.
    ///
    /// All-day values already denote a day and are returned untouched.
    pub fn event_day(&self, time: &EventTime) -> NaiveDate {
        match time {
            EventTime::AllDay(date) => *date,
            EventTime::DateTime(dt) => self.day_of(*dt),
        }
    }
}

impl FromStr for DisplayZone {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<Tz>()
            .map(Self)
            .map_err(|_| TimeError::UnknownTimezone(s.to_string()))
    }
}

impl fmt::Display for DisplayZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    mod event_time {
        use super::*;

        #[test]
        fn all_day_is_utc_midnight() {
            let et = EventTime::AllDay(date(2024, 1, 10));
            assert!(et.is_all_day());
            assert_eq!(et.to_utc_datetime(), utc(2024, 1, 10, 0, 0, 0));
        }

        #[test]
        fn previous_day() {
            assert_eq!(
                EventTime::AllDay(date(2024, 3, 1)).previous_day(),
                Some(EventTime::AllDay(date(2024, 2, 29)))
            );
            assert_eq!(
                EventTime::DateTime(utc(2024, 3, 1, 14, 0, 0)).previous_day(),
                Some(EventTime::DateTime(utc(2024, 2, 29, 14, 0, 0)))
            );
            assert_eq!(EventTime::AllDay(NaiveDate::MIN).previous_day(), None);
        }

        #[test]
        fn ordering() {
            let midnight = EventTime::AllDay(date(2025, 2, 5));
            let morning = EventTime::DateTime(utc(2025, 2, 5, 10, 0, 0));
            assert!(midnight < morning);
        }

        #[test]
        fn serde_roundtrip() {
            let et = EventTime::DateTime(utc(2025, 2, 5, 10, 30, 0));
            let json = serde_json::to_string(&et).unwrap();
            assert_eq!(serde_json::from_str::<EventTime>(&json).unwrap(), et);
        }
    }

    mod day_range {
        use super::*;

        #[test]
        fn overlap_is_half_open() {
            let booked = DayRange::new(date(2024, 3, 1), date(2024, 3, 4));
            assert!(booked.overlaps(&DayRange::new(date(2024, 3, 2), date(2024, 3, 3))));
            assert!(!booked.overlaps(&DayRange::new(date(2024, 3, 5), date(2024, 3, 6))));
            // Check-out day is free for the next check-in.
            assert!(!booked.overlaps(&DayRange::new(date(2024, 3, 4), date(2024, 3, 6))));
            assert!(!booked.overlaps(&DayRange::new(date(2024, 2, 27), date(2024, 3, 1))));
            assert!(booked.overlaps(&DayRange::new(date(2024, 2, 27), date(2024, 3, 2))));
        }

        #[test]
        fn from_inclusive() {
            let range = DayRange::from_inclusive(date(2024, 3, 1), date(2024, 3, 4));
            assert_eq!(range.end, date(2024, 3, 5));
            assert_eq!(range.nights(), 4);
            assert!(range.contains(date(2024, 3, 4)));
            assert!(!range.contains(date(2024, 3, 5)));
        }

        #[test]
        #[should_panic(expected = "start must be <= end")]
        fn inverted_range() {
            DayRange::new(date(2024, 3, 4), date(2024, 3, 1));
        }
    }

    mod display_zone {
        use super::*;

        #[test]
        fn default_is_manila() {
            assert_eq!(DisplayZone::default().name(), DEFAULT_DISPLAY_TIMEZONE);
        }

        #[test]
        fn parse_zone() {
            let zone: DisplayZone = "Europe/Paris".parse().unwrap();
            assert_eq!(zone.to_string(), "Europe/Paris");
            assert_eq!(
                "Mars/Olympus".parse::<DisplayZone>(),
                Err(TimeError::UnknownTimezone("Mars/Olympus".into()))
            );
        }

        #[test]
        fn day_start_in_manila() {
            let zone = DisplayZone::default();
            assert_eq!(zone.day_start(date(2024, 3, 1)), utc(2024, 2, 29, 16, 0, 0));
            assert_eq!(zone.day_of(utc(2024, 2, 29, 16, 0, 0)), date(2024, 3, 1));
            assert_eq!(zone.day_of(utc(2024, 2, 29, 15, 59, 59)), date(2024, 2, 29));
        }

        #[test]
        fn event_day_never_shifts_all_day_values() {
            let zone: DisplayZone = "America/Los_Angeles".parse().unwrap();
            let day = date(2024, 1, 10);
            assert_eq!(zone.event_day(&EventTime::AllDay(day)), day);
            // 02:00 UTC is the previous evening on the west coast.
            assert_eq!(
                zone.event_day(&EventTime::DateTime(utc(2024, 1, 10, 2, 0, 0))),
                date(2024, 1, 9)
            );
        }

        #[test]
        fn storage_display_symmetry_on_day_boundaries() {
            for name in [
                "Asia/Manila",
                "UTC",
                "America/New_York",
                "Europe/London",
                "America/Sao_Paulo",
                "Australia/Lord_Howe",
            ] {
                let zone: DisplayZone = name.parse().unwrap();
                let mut day = date(2018, 1, 1);
                while day < date(2019, 3, 1) {
                    let boundary = zone.day_start(day);
                    assert_eq!(
                        zone.to_storage(zone.to_display(boundary)),
                        boundary,
                        "{name} {day}"
                    );
                    assert_eq!(zone.day_of(boundary), day, "{name} {day}");
                    day = day.succ_opt().unwrap();
                }
            }
        }

        #[test]
        fn midnight_gap_moves_forward() {
            // Sao Paulo skipped 2018-11-04 00:00..01:00.
            let zone: DisplayZone = "America/Sao_Paulo".parse().unwrap();
            let start = zone.day_start(date(2018, 11, 4));
            assert_eq!(start, utc(2018, 11, 4, 3, 0, 0));
            assert_eq!(zone.to_display(start).time(), NaiveTime::from_hms_opt(1, 0, 0).unwrap());
        }
    }
}
