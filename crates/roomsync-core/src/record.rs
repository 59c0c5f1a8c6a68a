//! Durable records read and written through the store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::time::{DayRange, DisplayZone};

/// Identifier assigned by the store.
pub type RecordId = u64;

/// Setting key holding the sync interval in minutes.
pub const SYNC_INTERVAL_KEY: &str = "syncInterval";

/// Sync interval used when the setting is absent or unreadable.
pub const DEFAULT_SYNC_INTERVAL_MINUTES: u64 = 5;

/// Smallest sync interval an administrator may set.
pub const MIN_SYNC_INTERVAL_MINUTES: u64 = 1;

/// Largest sync interval: one week.
pub const MAX_SYNC_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Pulls `minutes` into the allowed sync interval range.
pub fn clamp_sync_interval(minutes: u64) -> u64 {
    minutes.clamp(MIN_SYNC_INTERVAL_MINUTES, MAX_SYNC_INTERVAL_MINUTES)
}

/// One external calendar feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSource {
    pub id: RecordId,
    pub name: String,
    pub url: String,
    /// Inactive sources are never fetched and never aggregated.
    pub active: bool,
    /// When the last reconciliation pass for this source completed.
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

/// A durable unavailable day span.
///
/// Ranges with an `external_id` belong to the reconciler. Ranges with
/// neither `external_id` nor `source` are manual blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedRange {
    pub id: RecordId,
    pub start_date: NaiveDate,
    /// Last blocked day, inclusive.
    pub end_date: NaiveDate,
    pub reason: String,
    #[serde(default)]
    pub external_id: Option<String>,
    /// Name of the owning calendar source.
    #[serde(default)]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BlockedRange {
    /// Returns `true` if this range was entered by an administrator.
    pub fn is_manual(&self) -> bool {
        self.external_id.is_none() && self.source.is_none()
    }

    /// The blocked days as a half-open range.
    pub fn days(&self) -> DayRange {
        DayRange::from_inclusive(self.start_date, self.end_date)
    }
}

/// Fields for a new blocked range. The store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDraft {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub external_id: Option<String>,
    pub source: Option<String>,
}

impl BlockDraft {
    /// A manual block owned by administrators.
    pub fn manual(start_date: NaiveDate, end_date: NaiveDate, reason: impl Into<String>) -> Self {
        Self {
            start_date,
            end_date,
            reason: reason.into(),
            external_id: None,
            source: None,
        }
    }
}

/// Lifecycle of a guest booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

/// A guest booking. Created elsewhere; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: RecordId,
    pub first_name: String,
    pub last_name: String,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub status: BookingStatus,
}

impl Booking {
    /// Returns `true` if the booking still occupies the room on or after `from`.
    pub fn is_active(&self, from: DateTime<Utc>) -> bool {
        self.status != BookingStatus::Cancelled && self.check_out >= from
    }

    /// Occupied display days; the check-out day itself is free.
    pub fn days(&self, zone: &DisplayZone) -> DayRange {
        let start = zone.day_of(self.check_in);
        let end = zone.day_of(self.check_out);
        DayRange::new(start, end.max(start))
    }
}

/// A single named configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSetting {
    pub key: String,
    pub value: String,
}

impl SyncSetting {
    /// The sync interval setting.
    pub fn interval(minutes: u64) -> Self {
        Self {
            key: SYNC_INTERVAL_KEY.to_string(),
            value: minutes.to_string(),
        }
    }

    /// Interval minutes, or `None` if the value is unusable.
    pub fn interval_minutes(&self) -> Option<u64> {
        self.value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|m| (MIN_SYNC_INTERVAL_MINUTES..=MAX_SYNC_INTERVAL_MINUTES).contains(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn manual_vs_external() {
        let now = Utc::now();
        let mut range = BlockedRange {
            id: 1,
            start_date: date(2024, 3, 1),
            end_date: date(2024, 3, 4),
            reason: "Painting".into(),
            external_id: None,
            source: None,
            created_at: now,
            updated_at: now,
        };
        assert!(range.is_manual());
        assert_eq!(range.days(), DayRange::new(date(2024, 3, 1), date(2024, 3, 5)));

        range.source = Some("Airbnb".into());
        range.external_id = Some("abc".into());
        assert!(!range.is_manual());
    }

    #[test]
    fn booking_days_use_display_zone() {
        let zone = DisplayZone::default();
        let booking = Booking {
            id: 7,
            first_name: "Ana".into(),
            last_name: "Reyes".into(),
            // 14:00 and 12:00 in Manila.
            check_in: Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap(),
            check_out: Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 0).unwrap(),
            status: BookingStatus::Confirmed,
        };
        assert_eq!(booking.days(&zone), DayRange::new(date(2024, 3, 1), date(2024, 3, 4)));
        assert!(booking.is_active(zone.day_start(date(2024, 3, 4))));
        assert!(!booking.is_active(zone.day_start(date(2024, 3, 5))));

        let cancelled = Booking {
            status: BookingStatus::Cancelled,
            ..booking
        };
        assert!(!cancelled.is_active(zone.day_start(date(2024, 2, 1))));
    }

    #[test]
    fn interval_setting() {
        assert_eq!(SyncSetting::interval(15).interval_minutes(), Some(15));
        let zero = SyncSetting {
            key: SYNC_INTERVAL_KEY.into(),
            value: "0".into(),
        };
        assert_eq!(zero.interval_minutes(), None);
        let junk = SyncSetting {
            key: SYNC_INTERVAL_KEY.into(),
            value: "soon".into(),
        };
        assert_eq!(junk.interval_minutes(), None);
        let huge = SyncSetting {
            key: SYNC_INTERVAL_KEY.into(),
            value: (u64::MAX / 2).to_string(),
        };
        assert_eq!(huge.interval_minutes(), None);
        assert_eq!(
            SyncSetting::interval(MAX_SYNC_INTERVAL_MINUTES).interval_minutes(),
            Some(MAX_SYNC_INTERVAL_MINUTES)
        );
        assert_eq!(clamp_sync_interval(0), MIN_SYNC_INTERVAL_MINUTES);
        assert_eq!(clamp_sync_interval(u64::MAX), MAX_SYNC_INTERVAL_MINUTES);
    }

    #[test]
    fn booking_status_serde() {
        assert_eq!(
            serde_json::to_string(&BookingStatus::CheckedIn).unwrap(),
            "\"checked-in\""
        );
    }
}
