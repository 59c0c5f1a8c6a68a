//! Event types for availability.
//!
//! - [`ParsedEvent`]: one VEVENT decoded from a feed, never persisted
//! - [`AggregatedInterval`]: one unavailable span in the merged read view
//! - [`IntervalKind`]: which kind of record produced an interval

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::time::{DayRange, EventTime};

/// An event decoded from one VEVENT block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEvent {
    /// Decoded DTSTART.
    pub start: EventTime,
    /// Decoded DTEND moved back one day, so it names the last occupied day.
    pub end: EventTime,
    /// Decoded DTSTAMP, if present.
    pub stamp: Option<DateTime<Utc>>,
    /// DTSTART token exactly as it appeared in the feed.
    pub raw_start: String,
    /// DTEND token exactly as it appeared in the feed.
    pub raw_end: String,
}

/// Label stored on ranges owned by a calendar feed.
pub fn external_label(source_name: &str) -> String {
    format!("{source_name} - External Booking")
}

/// The kind of record an interval was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalKind {
    /// A range synced from, or read live from, a calendar feed.
    External,
    /// A range entered by an administrator.
    Manual,
    /// A guest booking.
    Booking,
}

/// One unavailable span, tagged with where it came from.
///
/// `end` is exclusive: it is the first day that is free again.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregatedInterval {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub kind: IntervalKind,
    pub label: String,
}

impl AggregatedInterval {
    /// Interval for an externally owned range.
    pub fn external(range: DayRange, source_name: &str) -> Self {
        Self::new(range, IntervalKind::External, external_label(source_name))
    }

    /// Interval for a manual block.
    pub fn manual(range: DayRange, reason: &str) -> Self {
        Self::new(range, IntervalKind::Manual, format!("Manual Block: {reason}"))
    }

    /// Interval for a guest booking.
    pub fn booking(range: DayRange, first_name: &str, last_name: &str) -> Self {
        Self::new(
            range,
            IntervalKind::Booking,
            format!("Booking: {first_name} {last_name}"),
        )
    }

    fn new(range: DayRange, kind: IntervalKind, label: String) -> Self {
        Self {
            start: range.start,
            end: range.end,
            kind,
            label,
        }
    }

    /// The span as a half-open day range.
    pub fn range(&self) -> DayRange {
        DayRange {
            start: self.start,
            end: self.end,
        }
    }

    /// Returns `true` if a candidate stay `[cs, ce)` overlaps this interval.
    pub fn conflicts_with(&self, candidate: &DayRange) -> bool {
        self.range().overlaps(candidate)
    }
}

/// Returns the intervals a candidate stay collides with.
pub fn conflicts<'a>(
    intervals: &'a [AggregatedInterval],
    candidate: &DayRange,
) -> Vec<&'a AggregatedInterval> {
    intervals
        .iter()
        .filter(|interval| interval.conflicts_with(candidate))
        .collect()
}
