//! Request and response types for the roomsync protocol.

use chrono::{DateTime, NaiveDate, Utc};
use roomsync_core::{AggregatedInterval, BlockedRange, CalendarSource, RecordId};
use serde::{Deserialize, Serialize};

use crate::PROTOCOL_VERSION;

/// Message envelope wrapping all protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Protocol version (always "1" for v1).
    pub protocol_version: String,
    /// Unique request ID for correlation.
    pub request_id: String,
    /// The actual payload.
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Creates a new envelope with the current protocol version.
    pub fn new(request_id: impl Into<String>, payload: T) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            request_id: request_id.into(),
            payload,
        }
    }

    /// Creates a request envelope.
    pub fn request(request_id: impl Into<String>, request: T) -> Self {
        Self::new(request_id, request)
    }

    /// Creates a response envelope.
    pub fn response(request_id: impl Into<String>, response: T) -> Self {
        Self::new(request_id, response)
    }

    /// Checks if this envelope uses a compatible protocol version.
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}

/// Request types that can be sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check server liveness.
    Ping,

    /// Get server status.
    Status,

    /// Get the merged list of unavailable intervals.
    GetAvailability,

    /// Check a candidate stay `[start, end)` against current availability.
    CheckAvailability { start: NaiveDate, end: NaiveDate },

    /// Render the ICS export.
    ExportCalendar,

    /// Run one sync pass over all active sources now.
    SyncNow,

    /// Sync a single source now.
    SyncSource { id: RecordId },

    /// Read the sync interval.
    GetSyncInterval,

    /// Persist a new sync interval and re-arm the timer.
    SetSyncInterval { minutes: u64 },

    /// List calendar sources.
    ListSources,

    /// Register a calendar feed.
    AddSource { name: String, url: String },

    /// Enable or disable a calendar source.
    SetSourceActive { id: RecordId, active: bool },

    /// Remove a calendar source.
    RemoveSource { id: RecordId },

    /// List blocked ranges ending today or later.
    ListBlocks {
        /// Include past ranges as well.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        all: bool,
    },

    /// Add a manual block; `end` is the last blocked day.
    AddBlock {
        start: NaiveDate,
        end: NaiveDate,
        reason: String,
    },

    /// Remove a manual block.
    RemoveBlock { id: RecordId },

    /// Request server shutdown.
    Shutdown,
}

impl Request {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Status => "status",
            Self::GetAvailability => "get_availability",
            Self::CheckAvailability { .. } => "check_availability",
            Self::ExportCalendar => "export_calendar",
            Self::SyncNow => "sync_now",
            Self::SyncSource { .. } => "sync_source",
            Self::GetSyncInterval => "get_sync_interval",
            Self::SetSyncInterval { .. } => "set_sync_interval",
            Self::ListSources => "list_sources",
            Self::AddSource { .. } => "add_source",
            Self::SetSourceActive { .. } => "set_source_active",
            Self::RemoveSource { .. } => "remove_source",
            Self::ListBlocks { .. } => "list_blocks",
            Self::AddBlock { .. } => "add_block",
            Self::RemoveBlock { .. } => "remove_block",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Response types that can be sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to Ping.
    Pong,

    /// Generic success response.
    Ok,

    /// Server status information.
    Status {
        #[serde(flatten)]
        info: StatusInfo,
    },

    /// Sorted unavailable intervals.
    Availability { intervals: Vec<AggregatedInterval> },

    /// Result of checking a candidate stay.
    AvailabilityCheck {
        available: bool,
        conflicts: Vec<AggregatedInterval>,
    },

    /// ICS document.
    Calendar { ics: String },

    /// Outcome of a sync pass.
    SyncReport { report: SyncReport },

    /// A sync pass was already running, nothing was started.
    SyncSkipped,

    /// Current sync interval.
    SyncInterval { minutes: u64 },

    /// Calendar sources.
    Sources { sources: Vec<CalendarSource> },

    /// A single calendar source.
    Source { source: CalendarSource },

    /// Blocked ranges.
    Blocks { blocks: Vec<BlockedRange> },

    /// A single blocked range.
    Block { block: BlockedRange },

    /// Error response.
    Error {
        #[serde(flatten)]
        error: ErrorResponse,
    },
}

impl Response {
    /// Creates a Status response.
    pub fn status(info: StatusInfo) -> Self {
        Self::Status { info }
    }

    /// Creates an Error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            error: ErrorResponse::new(code, message),
        }
    }

    /// Returns true unless this is an error response.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Error { .. })
    }

    /// Returns the error if this is an error response.
    pub fn as_error(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Error { error } => Some(error),
            _ => None,
        }
    }
}

/// Server status information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Server uptime in seconds.
    pub uptime_seconds: u64,

    /// Display timezone used for day boundaries.
    pub timezone: String,

    /// Whether the background timer is armed.
    pub scheduler_armed: bool,

    /// Armed sync interval in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u64>,

    /// Whether a sync pass is in flight.
    pub sync_running: bool,

    /// Age of the cached availability result in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_age_seconds: Option<u64>,

    /// The most recent sync pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_report: Option<SyncReport>,

    /// Per-source summary.
    pub sources: Vec<SourceStatus>,
}

impl StatusInfo {
    /// Creates a new StatusInfo.
    pub fn new(uptime_seconds: u64, timezone: impl Into<String>) -> Self {
        Self {
            uptime_seconds,
            timezone: timezone.into(),
            scheduler_armed: false,
            interval_minutes: None,
            sync_running: false,
            cache_age_seconds: None,
            last_report: None,
            sources: Vec::new(),
        }
    }

    /// Builder: add a source status.
    pub fn with_source(mut self, source: SourceStatus) -> Self {
        self.sources.push(source);
        self
    }
}

/// Status of one calendar source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub id: RecordId,
    pub name: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Error from the most recent pass, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one sync pass over the active sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceSyncResult>,
    /// Set when the pass could not start, e.g. the store was unreachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    /// Number of sources that failed.
    pub fn failures(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SyncOutcome::Failed { .. }))
            .count()
    }

    /// Result for a source by name.
    pub fn source(&self, name: &str) -> Option<&SourceSyncResult> {
        self.sources.iter().find(|s| s.source == name)
    }
}

/// Result of syncing one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSyncResult {
    pub source_id: RecordId,
    pub source: String,
    pub outcome: SyncOutcome,
}

/// What happened to one source during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced {
        /// Events read from the feed.
        events: usize,
        created: usize,
        updated: usize,
        pruned: usize,
    },
    Failed {
        stage: SyncStage,
        error: String,
    },
}

/// The step a source failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Fetch,
    Upsert,
    Prune,
    MarkSynced,
}

/// Error codes for protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unknown or internal error.
    InternalError,

    /// Invalid request format or arguments.
    InvalidRequest,

    /// Request timed out.
    Timeout,

    /// Requested resource not found.
    NotFound,

    /// The record belongs to the sync path and cannot be edited.
    Forbidden,

    /// The durable store failed.
    StoreError,

    /// Background sync is disabled in the daemon configuration.
    SyncDisabled,

    /// Server is shutting down.
    ShuttingDown,
}

impl ErrorCode {
    /// Returns a human-readable description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InternalError => "An internal error occurred",
            Self::InvalidRequest => "The request was invalid",
            Self::Timeout => "The request timed out",
            Self::NotFound => "Requested resource not found",
            Self::Forbidden => "Record is managed by calendar sync",
            Self::StoreError => "The store rejected the operation",
            Self::SyncDisabled => "Background sync is disabled",
            Self::ShuttingDown => "Server is shutting down",
        }
    }
}

/// Error response details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    /// Creates a new error response.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

impl std::error::Error for ErrorResponse {}
