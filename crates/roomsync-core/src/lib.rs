//! Core types: records, ICS parsing and export, display timezone

pub mod event;
pub mod export;
pub mod ics;
pub mod record;
pub mod time;
pub mod tracing;

pub use event::{AggregatedInterval, IntervalKind, ParsedEvent, conflicts, external_label};
pub use export::{CalendarExport, ExportOptions};
pub use ics::{decode_date_token, parse_ics};
pub use record::{
    BlockDraft, BlockedRange, Booking, BookingStatus, CalendarSource, DEFAULT_SYNC_INTERVAL_MINUTES,
    MAX_SYNC_INTERVAL_MINUTES, MIN_SYNC_INTERVAL_MINUTES, RecordId, SYNC_INTERVAL_KEY, SyncSetting,
    clamp_sync_interval,
};
pub use time::{DEFAULT_DISPLAY_TIMEZONE, DayRange, DisplayZone, EventTime, TimeError};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
