//! Output rendering for daemon responses.
//!
//! - **Text**: aligned, human-readable tables
//! - **JSON**: the response payload as pretty-printed JSON

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use roomsync_core::{AggregatedInterval, BlockedRange, CalendarSource, IntervalKind};
use roomsync_protocol::{Response, StatusInfo, SyncOutcome, SyncReport, SyncStage};

use crate::error::{ClientError, ClientResult};

/// How responses are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Text }
    }
}

/// Renders `response` in `format`.
pub fn render(response: &Response, format: OutputFormat) -> ClientResult<String> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(response)
            .map_err(|e| ClientError::Protocol(format!("failed to encode response: {e}")));
    }

    Ok(match response {
        Response::Pong | Response::Ok => "ok".to_string(),
        Response::Status { info } => status(info),
        Response::Availability { intervals } => availability(intervals),
        Response::AvailabilityCheck {
            available,
            conflicts,
        } => {
            if *available {
                "Available".to_string()
            } else {
                format!(
                    "Unavailable, {} conflicting interval(s):\n{}",
                    conflicts.len(),
                    availability(conflicts)
                )
            }
        }
        Response::Calendar { ics } => ics.clone(),
        Response::SyncReport { report } => sync_report(report),
        Response::SyncSkipped => "A sync pass is already running; nothing done.".to_string(),
        Response::SyncInterval { minutes } => format!("Sync interval: {minutes} minute(s)"),
        Response::Sources { sources } => source_table(sources),
        Response::Source { source } => source_line(source),
        Response::Blocks { blocks } => block_table(blocks),
        Response::Block { block } => format!(
            "Block {}: {} to {} ({})",
            block.id, block.start_date, block.end_date, block.reason
        ),
        Response::Error { error } => format!("error: {}", error.message),
    })
}

fn kind_name(kind: IntervalKind) -> &'static str {
    match kind {
        IntervalKind::External => "external",
        IntervalKind::Manual => "manual",
        IntervalKind::Booking => "booking",
    }
}

fn stage_name(stage: SyncStage) -> &'static str {
    match stage {
        SyncStage::Fetch => "fetch",
        SyncStage::Upsert => "upsert",
        SyncStage::Prune => "prune",
        SyncStage::MarkSynced => "mark-synced",
    }
}

fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn availability(intervals: &[AggregatedInterval]) -> String {
    if intervals.is_empty() {
        return "No unavailable days.".to_string();
    }
    let mut out = format!("{:<10}  {:<10}  {:<8}  {}", "FROM", "UNTIL", "KIND", "LABEL");
    for interval in intervals {
        let _ = write!(
            out,
            "\n{:<10}  {:<10}  {:<8}  {}",
            interval.start,
            interval.end,
            kind_name(interval.kind),
            interval.label
        );
    }
    out
}

fn sync_report(report: &SyncReport) -> String {
    let mut out = format!(
        "Sync pass {} ({} source(s), {} failed)",
        report.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.sources.len(),
        report.failures()
    );
    if let Some(error) = &report.error {
        let _ = write!(out, "\n  could not start: {error}");
    }
    for result in &report.sources {
        let _ = match &result.outcome {
            SyncOutcome::Synced {
                events,
                created,
                updated,
                pruned,
            } => write!(
                out,
                "\n  {}: {events} event(s), {created} created, {updated} updated, {pruned} pruned",
                result.source
            ),
            SyncOutcome::Failed { stage, error } => write!(
                out,
                "\n  {}: failed at {}: {error}",
                result.source,
                stage_name(*stage)
            ),
        };
    }
    out
}

fn source_line(source: &CalendarSource) -> String {
    format!(
        "Source {} '{}' ({}) {}",
        source.id,
        source.name,
        if source.active { "active" } else { "disabled" },
        source.url
    )
}

fn source_table(sources: &[CalendarSource]) -> String {
    if sources.is_empty() {
        return "No calendar sources.".to_string();
    }
    let mut out = format!(
        "{:>4}  {:<8}  {:<20}  {:<16}  {}",
        "ID", "STATE", "LAST SYNC", "NAME", "URL"
    );
    for source in sources {
        let _ = write!(
            out,
            "\n{:>4}  {:<8}  {:<20}  {:<16}  {}",
            source.id,
            if source.active { "active" } else { "disabled" },
            timestamp(source.last_sync),
            source.name,
            source.url
        );
    }
    out
}

fn block_table(blocks: &[BlockedRange]) -> String {
    if blocks.is_empty() {
        return "No blocked ranges.".to_string();
    }
    let mut out = format!(
        "{:>4}  {:<10}  {:<10}  {:<12}  {}",
        "ID", "START", "END", "OWNER", "REASON"
    );
    for block in blocks {
        let _ = write!(
            out,
            "\n{:>4}  {:<10}  {:<10}  {:<12}  {}",
            block.id,
            block.start_date,
            block.end_date,
            block.source.as_deref().unwrap_or("manual"),
            block.reason
        );
    }
    out
}

fn status(info: &StatusInfo) -> String {
    let mut out = format!(
        "Uptime: {}s\nTimezone: {}\nScheduler: {}",
        info.uptime_seconds,
        info.timezone,
        match (info.scheduler_armed, info.interval_minutes) {
            (true, Some(minutes)) => format!("every {minutes} minute(s)"),
            (true, None) => "armed".to_string(),
            (false, _) => "off".to_string(),
        }
    );
    if info.sync_running {
        out.push_str(" (sync running)");
    }
    if let Some(age) = info.cache_age_seconds {
        let _ = write!(out, "\nCache age: {age}s");
    }
    if let Some(report) = &info.last_report {
        let _ = write!(out, "\nLast {}", sync_report(report));
    }
    for source in &info.sources {
        let _ = write!(
            out,
            "\n- {} [{}] last sync {}",
            source.name,
            if source.active { "active" } else { "disabled" },
            timestamp(source.last_sync)
        );
        if let Some(error) = &source.error {
            let _ = write!(out, ", error: {error}");
        }
    }
    out
}
