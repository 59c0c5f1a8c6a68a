//! Reconciles one source's parsed feed into durable blocked ranges.
//!
//! A pass upserts one range per feed event, keyed by a stable hash of the
//! source id and the raw DTSTART/DTEND tokens, as a single batch. It then
//! prunes that source's
//! lapsed ranges and finally stamps the source's `last_sync`. Pruning runs
//! only after every upsert has completed, and it filters on the source name.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use roomsync_core::{
    BlockDraft, CalendarSource, DisplayZone, ParsedEvent, RecordId, external_label,
};
use roomsync_protocol::SyncStage;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::store::{Store, StoreError, Upserted};

/// Derives the stable key for a feed event.
///
/// The same source and tokens always hash to the same id, so re-syncing an
/// unchanged feed updates ranges instead of duplicating them.
pub fn external_id(source_id: RecordId, raw_start: &str, raw_end: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.to_le_bytes());
    hasher.update(b"\x1f");
    hasher.update(raw_start.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(raw_end.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Events in the feed.
    pub events: usize,
    pub created: usize,
    pub updated: usize,
    pub pruned: usize,
    /// Duplicate or already-lapsed events.
    pub skipped: usize,
}

/// A store failure, tagged with the step it interrupted.
#[derive(Debug, Error)]
#[error("{} failed: {source}", stage_name(.stage))]
pub struct ReconcileError {
    pub stage: SyncStage,
    pub source: StoreError,
}

impl ReconcileError {
    fn at(stage: SyncStage) -> impl FnOnce(StoreError) -> Self {
        move |source| Self { stage, source }
    }
}

fn stage_name(stage: &SyncStage) -> &'static str {
    match stage {
        SyncStage::Fetch => "fetch",
        SyncStage::Upsert => "upsert",
        SyncStage::Prune => "prune",
        SyncStage::MarkSynced => "mark synced",
    }
}

/// Writes parsed feed events into the store for one source at a time.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    zone: DisplayZone,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, zone: DisplayZone) -> Self {
        Self { store, zone }
    }

    /// Makes the source's ranges reflect `events`.
    ///
    /// Manual blocks and other sources' ranges are never touched. An empty
    /// feed still prunes and still stamps `last_sync`.
    pub async fn reconcile(
        &self,
        source: &CalendarSource,
        events: &[ParsedEvent],
        now: DateTime<Utc>,
    ) -> Result<ReconcileStats, ReconcileError> {
        let today = self.zone.today(now);
        let reason = external_label(&source.name);
        let mut stats = ReconcileStats {
            events: events.len(),
            ..Default::default()
        };
        let mut seen = HashSet::new();
        let mut drafts = Vec::with_capacity(events.len());

        for event in events {
            let id = external_id(source.id, &event.raw_start, &event.raw_end);
            if !seen.insert(id.clone()) {
                trace!(source = %source.name, external_id = %id, "Duplicate event in feed");
                stats.skipped += 1;
                continue;
            }

            let start = self.zone.event_day(&event.start);
            let end = self.zone.event_day(&event.end).max(start);
            if end < today {
                stats.skipped += 1;
                continue;
            }

            drafts.push(BlockDraft {
                start_date: start,
                end_date: end,
                reason: reason.clone(),
                external_id: Some(id),
                source: Some(source.name.clone()),
            });
        }

        let upserted = self
            .store
            .upsert_external_blocks(drafts, now)
            .await
            .map_err(ReconcileError::at(SyncStage::Upsert))?;
        for outcome in &upserted {
            match outcome {
                Upserted::Created(range) => {
                    trace!(source = %source.name, id = range.id, "Created range");
                    stats.created += 1;
                }
                Upserted::Updated(_) => stats.updated += 1,
            }
        }

        stats.pruned = self
            .store
            .prune_source_blocks(&source.name, Some(today))
            .await
            .map_err(ReconcileError::at(SyncStage::Prune))?;

        self.store
            .mark_source_synced(source.id, now)
            .await
            .map_err(ReconcileError::at(SyncStage::MarkSynced))?;

        if stats.created > 0 || stats.pruned > 0 {
            info!(
                source = %source.name,
                events = stats.events,
                created = stats.created,
                updated = stats.updated,
                pruned = stats.pruned,
                "Reconciled feed"
            );
        } else {
            debug!(
                source = %source.name,
                events = stats.events,
                updated = stats.updated,
                "Feed unchanged"
            );
        }
        Ok(stats)
    }
}
