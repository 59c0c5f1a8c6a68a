//! Durable store for sources, blocked ranges, bookings and settings.
//!
//! [`Store`] is the seam between the daemon and its system of record. The
//! reconciler and the admin handlers write through it; the aggregator only
//! reads. [`MemoryStore`] keeps everything in one JSON snapshot that is
//! rewritten after every mutation; a batch upsert counts as one.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use roomsync_core::{
    BlockDraft, BlockedRange, Booking, CalendarSource, RecordId, SyncSetting,
};
use roomsync_providers::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, trace};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a [`Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with that id.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The record failed validation.
    #[error("invalid record: {0}")]
    Invalid(String),

    /// Reading or writing the snapshot failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store cannot serve requests right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Creates a not-found error.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Whether an upsert created a new range or updated an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted {
    Created(BlockedRange),
    Updated(BlockedRange),
}

impl Upserted {
    /// The stored range.
    pub fn range(&self) -> &BlockedRange {
        match self {
            Self::Created(range) | Self::Updated(range) => range,
        }
    }
}

/// Key-based CRUD over the four record kinds.
pub trait Store: Send + Sync {
    /// All calendar sources, ordered by id.
    fn list_sources(&self) -> BoxFuture<'_, StoreResult<Vec<CalendarSource>>>;

    fn get_source(&self, id: RecordId) -> BoxFuture<'_, StoreResult<CalendarSource>>;

    /// Registers an active source. Names are unique.
    fn insert_source<'a>(
        &'a self,
        name: &'a str,
        url: &'a str,
    ) -> BoxFuture<'a, StoreResult<CalendarSource>>;

    fn set_source_active(
        &self,
        id: RecordId,
        active: bool,
    ) -> BoxFuture<'_, StoreResult<CalendarSource>>;

    /// Removes the source record only; its ranges are left to the caller.
    fn delete_source(&self, id: RecordId) -> BoxFuture<'_, StoreResult<CalendarSource>>;

    /// Stamps the completion time of a reconciliation pass.
    fn mark_source_synced(&self, id: RecordId, at: DateTime<Utc>)
    -> BoxFuture<'_, StoreResult<()>>;

    /// Blocked ranges whose last day is on or after `from`, or all of them.
    fn list_blocks(&self, from: Option<NaiveDate>) -> BoxFuture<'_, StoreResult<Vec<BlockedRange>>>;

    fn get_block(&self, id: RecordId) -> BoxFuture<'_, StoreResult<BlockedRange>>;

    /// Inserts a new range. A duplicate `external_id` is a conflict.
    fn insert_block(
        &self,
        draft: BlockDraft,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<BlockedRange>>;

    /// Creates or updates the range keyed by each draft's `external_id`,
    /// as one write and in order. If any draft is rejected, none are
    /// applied.
    ///
    /// On update the dates, reason and source are overwritten and
    /// `updated_at` is bumped; `created_at` is kept.
    fn upsert_external_blocks(
        &self,
        drafts: Vec<BlockDraft>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<Upserted>>>;

    fn delete_block(&self, id: RecordId) -> BoxFuture<'_, StoreResult<BlockedRange>>;

    /// Deletes ranges owned by `source` whose last day is before `before`.
    ///
    /// `None` deletes every range owned by `source`. Returns the number
    /// of deleted ranges. Ranges with a different or no source are never
    /// touched.
    fn prune_source_blocks<'a>(
        &'a self,
        source: &'a str,
        before: Option<NaiveDate>,
    ) -> BoxFuture<'a, StoreResult<usize>>;

    /// Non-cancelled bookings checking out at or after `from`.
    fn list_bookings(&self, from: DateTime<Utc>) -> BoxFuture<'_, StoreResult<Vec<Booking>>>;

    fn get_setting<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Option<SyncSetting>>>;

    fn put_setting(&self, setting: SyncSetting) -> BoxFuture<'_, StoreResult<()>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Snapshot {
    next_id: RecordId,
    sources: Vec<CalendarSource>,
    blocks: Vec<BlockedRange>,
    bookings: Vec<Booking>,
    settings: Vec<SyncSetting>,
}

impl Snapshot {
    fn allocate_id(&mut self) -> RecordId {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        id
    }

    /// Keeps `next_id` ahead of ids written by hand into the snapshot.
    fn reserve_loaded_ids(&mut self) {
        let highest = self
            .sources
            .iter()
            .map(|s| s.id)
            .chain(self.blocks.iter().map(|b| b.id))
            .chain(self.bookings.iter().map(|b| b.id))
            .max()
            .unwrap_or(0);
        self.next_id = self.next_id.max(highest + 1);
    }

    fn upsert_block(&mut self, draft: BlockDraft, now: DateTime<Utc>) -> StoreResult<Upserted> {
        check_dates(draft.start_date, draft.end_date)?;
        let Some(external_id) = draft.external_id else {
            return Err(StoreError::Invalid("upsert needs an external id".into()));
        };
        if let Some(block) = self
            .blocks
            .iter_mut()
            .find(|b| b.external_id.as_deref() == Some(external_id.as_str()))
        {
            block.start_date = draft.start_date;
            block.end_date = draft.end_date;
            block.reason = draft.reason;
            block.source = draft.source;
            block.updated_at = now;
            return Ok(Upserted::Updated(block.clone()));
        }
        let block = BlockedRange {
            id: self.allocate_id(),
            start_date: draft.start_date,
            end_date: draft.end_date,
            reason: draft.reason,
            external_id: Some(external_id),
            source: draft.source,
            created_at: now,
            updated_at: now,
        };
        self.blocks.push(block.clone());
        Ok(Upserted::Created(block))
    }
}

/// In-process store with optional JSON persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Snapshot>,
    path: Option<PathBuf>,
    #[cfg(test)]
    failing_source: std::sync::Mutex<Option<String>>,
    #[cfg(test)]
    writes: std::sync::atomic::AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store that is never written to disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the snapshot at `path`, starting empty if it does not exist.
    ///
    /// Every later mutation rewrites the file.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                snapshot.reserve_loaded_ids();
                snapshot
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No snapshot yet, starting empty");
                Snapshot::default()
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            sources = snapshot.sources.len(),
            blocks = snapshot.blocks.len(),
            bookings = snapshot.bookings.len(),
            "Opened store"
        );

        Ok(Self {
            state: RwLock::new(snapshot),
            path: Some(path),
            ..Default::default()
        })
    }

    /// Adds a booking. Bookings are normally created outside roomsync and
    /// arrive through the snapshot; this seeds them directly.
    pub async fn insert_booking(&self, booking: Booking) -> StoreResult<Booking> {
        self.mutate(|s| {
            let booking = Booking {
                id: s.allocate_id(),
                ..booking
            };
            s.bookings.push(booking.clone());
            Ok(booking)
        })
        .await
    }

    /// Makes every upsert for `source` fail until cleared.
    #[cfg(test)]
    pub(crate) fn fail_upserts_for(&self, source: Option<&str>) {
        if let Ok(mut failing) = self.failing_source.lock() {
            *failing = source.map(str::to_string);
        }
    }

    /// Number of snapshot files written so far.
    #[cfg(test)]
    pub(crate) fn snapshot_writes(&self) -> usize {
        self.writes.load(std::sync::atomic::Ordering::SeqCst)
    }

    #[cfg(test)]
    fn injected_failure(&self, draft: &BlockDraft) -> StoreResult<()> {
        let failing = self
            .failing_source
            .lock()
            .map(|f| f.is_some() && f.as_deref() == draft.source.as_deref())
            .unwrap_or(false);
        if failing {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    /// Applies `f` to a copy of the state, persists the copy, then commits it.
    async fn mutate<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Snapshot) -> StoreResult<T>,
    {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *state = next;
        Ok(out)
    }

    async fn persist(&self, snapshot: &Snapshot) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        #[cfg(test)]
        self.writes
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        trace!(path = %path.display(), "Persisted snapshot");
        Ok(())
    }
}

fn check_dates(start: NaiveDate, end: NaiveDate) -> StoreResult<()> {
    if start > end {
        return Err(StoreError::Invalid(format!(
            "range starts {start} after it ends {end}"
        )));
    }
    Ok(())
}

impl Store for MemoryStore {
    fn list_sources(&self) -> BoxFuture<'_, StoreResult<Vec<CalendarSource>>> {
        Box::pin(async move { Ok(self.state.read().await.sources.clone()) })
    }

    fn get_source(&self, id: RecordId) -> BoxFuture<'_, StoreResult<CalendarSource>> {
        Box::pin(async move {
            self.state
                .read()
                .await
                .sources
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("source", id))
        })
    }

    fn insert_source<'a>(
        &'a self,
        name: &'a str,
        url: &'a str,
    ) -> BoxFuture<'a, StoreResult<CalendarSource>> {
        Box::pin(async move {
            let name = name.trim();
            if name.is_empty() {
                return Err(StoreError::Invalid("source name must not be empty".into()));
            }
            self.mutate(|s| {
                if s.sources.iter().any(|existing| existing.name == name) {
                    return Err(StoreError::Conflict(format!(
                        "a source named '{name}' already exists"
                    )));
                }
                let source = CalendarSource {
                    id: s.allocate_id(),
                    name: name.to_string(),
                    url: url.trim().to_string(),
                    active: true,
                    last_sync: None,
                };
                s.sources.push(source.clone());
                Ok(source)
            })
            .await
        })
    }

    fn set_source_active(
        &self,
        id: RecordId,
        active: bool,
    ) -> BoxFuture<'_, StoreResult<CalendarSource>> {
        Box::pin(async move {
            self.mutate(|s| {
                let source = s
                    .sources
                    .iter_mut()
                    .find(|s| s.id == id)
                    .ok_or_else(|| StoreError::not_found("source", id))?;
                source.active = active;
                Ok(source.clone())
            })
            .await
        })
    }

    fn delete_source(&self, id: RecordId) -> BoxFuture<'_, StoreResult<CalendarSource>> {
        Box::pin(async move {
            self.mutate(|s| {
                let index = s
                    .sources
                    .iter()
                    .position(|s| s.id == id)
                    .ok_or_else(|| StoreError::not_found("source", id))?;
                Ok(s.sources.remove(index))
            })
            .await
        })
    }

    fn mark_source_synced(
        &self,
        id: RecordId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.mutate(|s| {
                let source = s
                    .sources
                    .iter_mut()
                    .find(|s| s.id == id)
                    .ok_or_else(|| StoreError::not_found("source", id))?;
                source.last_sync = Some(at);
                Ok(())
            })
            .await
        })
    }

    fn list_blocks(
        &self,
        from: Option<NaiveDate>,
    ) -> BoxFuture<'_, StoreResult<Vec<BlockedRange>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let mut blocks: Vec<BlockedRange> = state
                .blocks
                .iter()
                .filter(|b| from.is_none_or(|from| b.end_date >= from))
                .cloned()
                .collect();
            blocks.sort_by_key(|b| (b.start_date, b.id));
            Ok(blocks)
        })
    }

    fn get_block(&self, id: RecordId) -> BoxFuture<'_, StoreResult<BlockedRange>> {
        Box::pin(async move {
            self.state
                .read()
                .await
                .blocks
                .iter()
                .find(|b| b.id == id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("block", id))
        })
    }

    fn insert_block(
        &self,
        draft: BlockDraft,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<BlockedRange>> {
        Box::pin(async move {
            check_dates(draft.start_date, draft.end_date)?;
            self.mutate(|s| {
                if let Some(external_id) = &draft.external_id
                    && s.blocks
                        .iter()
                        .any(|b| b.external_id.as_ref() == Some(external_id))
                {
                    return Err(StoreError::Conflict(format!(
                        "external id {external_id} already stored"
                    )));
                }
                let block = BlockedRange {
                    id: s.allocate_id(),
                    start_date: draft.start_date,
                    end_date: draft.end_date,
                    reason: draft.reason,
                    external_id: draft.external_id,
                    source: draft.source,
                    created_at: now,
                    updated_at: now,
                };
                s.blocks.push(block.clone());
                Ok(block)
            })
            .await
        })
    }

    fn upsert_external_blocks(
        &self,
        drafts: Vec<BlockDraft>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<Upserted>>> {
        Box::pin(async move {
            if drafts.is_empty() {
                return Ok(Vec::new());
            }
            #[cfg(test)]
            for draft in &drafts {
                self.injected_failure(draft)?;
            }

            let count = drafts.len();
            let upserted = self
                .mutate(|s| {
                    drafts
                        .into_iter()
                        .map(|draft| s.upsert_block(draft, now))
                        .collect::<StoreResult<Vec<_>>>()
                })
                .await?;
            trace!(count, "Upserted batch");
            Ok(upserted)
        })
    }

    fn delete_block(&self, id: RecordId) -> BoxFuture<'_, StoreResult<BlockedRange>> {
        Box::pin(async move {
            self.mutate(|s| {
                let index = s
                    .blocks
                    .iter()
                    .position(|b| b.id == id)
                    .ok_or_else(|| StoreError::not_found("block", id))?;
                Ok(s.blocks.remove(index))
            })
            .await
        })
    }

    fn prune_source_blocks<'a>(
        &'a self,
        source: &'a str,
        before: Option<NaiveDate>,
    ) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            self.mutate(|s| {
                let count = s.blocks.len();
                s.blocks.retain(|b| {
                    let owned = b.source.as_deref() == Some(source);
                    let lapsed = before.is_none_or(|before| b.end_date < before);
                    !(owned && lapsed)
                });
                Ok(count - s.blocks.len())
            })
            .await
        })
    }

    fn list_bookings(&self, from: DateTime<Utc>) -> BoxFuture<'_, StoreResult<Vec<Booking>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let mut bookings: Vec<Booking> = state
                .bookings
                .iter()
                .filter(|b| b.is_active(from))
                .cloned()
                .collect();
            bookings.sort_by_key(|b| (b.check_in, b.id));
            Ok(bookings)
        })
    }

    fn get_setting<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<SyncSetting>>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .await
                .settings
                .iter()
                .find(|s| s.key == key)
                .cloned())
        })
    }

    fn put_setting(&self, setting: SyncSetting) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.mutate(|s| {
                match s.settings.iter_mut().find(|s| s.key == setting.key) {
                    Some(existing) => existing.value = setting.value,
                    None => s.settings.push(setting),
                }
                Ok(())
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use roomsync_core::{BookingStatus, SYNC_INTERVAL_KEY};
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 15, 4, 0, 0).unwrap()
    }

    fn external(id: &str, source: &str, start: NaiveDate, end: NaiveDate) -> BlockDraft {
        BlockDraft {
            start_date: start,
            end_date: end,
            reason: format!("{source} - External Booking"),
            external_id: Some(id.to_string()),
            source: Some(source.to_string()),
        }
    }

    async fn upsert(store: &MemoryStore, draft: BlockDraft, at: DateTime<Utc>) -> StoreResult<Upserted> {
        let mut upserted = store.upsert_external_blocks(vec![draft], at).await?;
        Ok(upserted.remove(0))
    }

    #[tokio::test]
    async fn source_names_are_unique() {
        let store = MemoryStore::new();
        let airbnb = store
            .insert_source("Airbnb", " https://a.example/feed.ics ")
            .await
            .unwrap();
        assert!(airbnb.active);
        assert_eq!(airbnb.url, "https://a.example/feed.ics");

        let err = store
            .insert_source("Airbnb", "https://b.example/feed.ics")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = store.insert_source("  ", "https://b.example").await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        let disabled = store.set_source_active(airbnb.id, false).await.unwrap();
        assert!(!disabled.active);
        assert_eq!(store.list_sources().await.unwrap(), vec![disabled]);
    }

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let store = MemoryStore::new();
        let first = upsert(&store, external("x1", "Airbnb", date(2024, 3, 1), date(2024, 3, 4)), now())
            .await
            .unwrap();
        assert!(matches!(first, Upserted::Created(_)));

        let later = now() + chrono::Duration::minutes(5);
        let second = upsert(&store, external("x1", "Airbnb", date(2024, 3, 1), date(2024, 3, 5)), later)
            .await
            .unwrap();
        let Upserted::Updated(updated) = second else {
            panic!("expected update");
        };
        assert_eq!(updated.id, first.range().id);
        assert_eq!(updated.end_date, date(2024, 3, 5));
        assert_eq!(updated.created_at, now());
        assert_eq!(updated.updated_at, later);
        assert_eq!(store.list_blocks(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_upsert_writes_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roomsync.json");
        let store = MemoryStore::open(&path).await.unwrap();
        upsert(&store, external("x1", "Airbnb", date(2024, 3, 1), date(2024, 3, 2)), now())
            .await
            .unwrap();
        let writes = store.snapshot_writes();

        let drafts = vec![
            external("x1", "Airbnb", date(2024, 3, 1), date(2024, 3, 3)),
            external("x2", "Airbnb", date(2024, 3, 5), date(2024, 3, 6)),
            external("x3", "Airbnb", date(2024, 3, 9), date(2024, 3, 9)),
        ];
        let upserted = store.upsert_external_blocks(drafts, now()).await.unwrap();
        assert!(matches!(upserted[0], Upserted::Updated(_)));
        assert!(matches!(upserted[1], Upserted::Created(_)));
        assert!(matches!(upserted[2], Upserted::Created(_)));
        assert_eq!(store.snapshot_writes(), writes + 1);

        assert!(store.upsert_external_blocks(Vec::new(), now()).await.unwrap().is_empty());
        assert_eq!(store.snapshot_writes(), writes + 1);
        drop(store);

        let reopened = MemoryStore::open(&path).await.unwrap();
        let stored = reopened.list_blocks(None).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].end_date, date(2024, 3, 3));
    }

    #[tokio::test]
    async fn batch_upsert_is_all_or_nothing() {
        let store = MemoryStore::new();
        let drafts = vec![
            external("x1", "Airbnb", date(2024, 3, 1), date(2024, 3, 2)),
            external("x2", "Airbnb", date(2024, 3, 6), date(2024, 3, 5)),
        ];
        let err = store.upsert_external_blocks(drafts, now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert!(store.list_blocks(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_requires_external_id() {
        let store = MemoryStore::new();
        let draft = BlockDraft::manual(date(2024, 3, 1), date(2024, 3, 2), "Repairs");
        let err = upsert(&store, draft, now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_external_id_and_reversed_dates() {
        let store = MemoryStore::new();
        let draft = external("x1", "Airbnb", date(2024, 3, 1), date(2024, 3, 4));
        store.insert_block(draft.clone(), now()).await.unwrap();
        assert!(matches!(
            store.insert_block(draft, now()).await,
            Err(StoreError::Conflict(_))
        ));

        let reversed = BlockDraft::manual(date(2024, 3, 5), date(2024, 3, 1), "Oops");
        assert!(matches!(
            store.insert_block(reversed, now()).await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn prune_is_scoped_to_one_source() {
        let store = MemoryStore::new();
        let past = (date(2024, 1, 1), date(2024, 1, 3));
        for (id, source) in [("a", "Airbnb"), ("b", "Booking.com")] {
            upsert(&store, external(id, source, past.0, past.1), now())
                .await
                .unwrap();
        }
        upsert(&store, external("a2", "Airbnb", date(2024, 3, 1), date(2024, 3, 2)), now())
            .await
            .unwrap();
        store
            .insert_block(BlockDraft::manual(past.0, past.1, "Repairs"), now())
            .await
            .unwrap();

        let pruned = store
            .prune_source_blocks("Airbnb", Some(date(2024, 2, 15)))
            .await
            .unwrap();
        assert_eq!(pruned, 1);

        let left: Vec<_> = store
            .list_blocks(None)
            .await
            .unwrap()
            .into_iter()
            .map(|b| (b.source, b.end_date))
            .collect();
        assert_eq!(
            left,
            vec![
                (Some("Booking.com".to_string()), past.1),
                (None, past.1),
                (Some("Airbnb".to_string()), date(2024, 3, 2)),
            ]
        );

        assert_eq!(store.prune_source_blocks("Airbnb", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_blocks_filters_by_last_day() {
        let store = MemoryStore::new();
        store
            .insert_block(BlockDraft::manual(date(2024, 2, 10), date(2024, 2, 14), "Old"), now())
            .await
            .unwrap();
        store
            .insert_block(BlockDraft::manual(date(2024, 2, 12), date(2024, 2, 15), "Ends today"), now())
            .await
            .unwrap();

        let current = store.list_blocks(Some(date(2024, 2, 15))).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].reason, "Ends today");
        assert_eq!(store.list_blocks(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bookings_skip_cancelled_and_past() {
        let store = MemoryStore::new();
        let booking = |day: u32, status| Booking {
            id: 0,
            first_name: "Ana".into(),
            last_name: "Reyes".into(),
            check_in: Utc.with_ymd_and_hms(2024, 2, day, 6, 0, 0).unwrap(),
            check_out: Utc.with_ymd_and_hms(2024, 2, day + 2, 4, 0, 0).unwrap(),
            status,
        };
        store.insert_booking(booking(1, BookingStatus::CheckedOut)).await.unwrap();
        store.insert_booking(booking(20, BookingStatus::Cancelled)).await.unwrap();
        let kept = store.insert_booking(booking(14, BookingStatus::CheckedIn)).await.unwrap();

        let active = store.list_bookings(now()).await.unwrap();
        assert_eq!(active, vec![kept]);
    }

    #[tokio::test]
    async fn settings_are_replaced() {
        let store = MemoryStore::new();
        assert!(store.get_setting(SYNC_INTERVAL_KEY).await.unwrap().is_none());

        store.put_setting(SyncSetting::interval(10)).await.unwrap();
        store.put_setting(SyncSetting::interval(15)).await.unwrap();
        let setting = store.get_setting(SYNC_INTERVAL_KEY).await.unwrap().unwrap();
        assert_eq!(setting.interval_minutes(), Some(15));
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_source(3).await,
            Err(StoreError::NotFound { kind: "source", .. })
        ));
        assert!(matches!(
            store.delete_block(3).await,
            Err(StoreError::NotFound { kind: "block", .. })
        ));
        assert!(store.mark_source_synced(3, now()).await.is_err());
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("roomsync.json");

        let store = MemoryStore::open(&path).await.unwrap();
        let source = store
            .insert_source("Airbnb", "https://a.example/feed.ics")
            .await
            .unwrap();
        store.mark_source_synced(source.id, now()).await.unwrap();
        store
            .insert_block(BlockDraft::manual(date(2024, 3, 1), date(2024, 3, 2), "Repairs"), now())
            .await
            .unwrap();
        store.put_setting(SyncSetting::interval(7)).await.unwrap();
        drop(store);

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = MemoryStore::open(&path).await.unwrap();
        let sources = reopened.list_sources().await.unwrap();
        assert_eq!(sources[0].last_sync, Some(now()));
        assert_eq!(reopened.list_blocks(None).await.unwrap().len(), 1);

        let next = reopened
            .insert_source("Booking.com", "https://b.example/feed.ics")
            .await
            .unwrap();
        assert!(next.id > source.id);
        assert!(next.id > reopened.list_blocks(None).await.unwrap()[0].id);
    }

    #[tokio::test]
    async fn hand_written_snapshot_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roomsync.json");
        std::fs::write(
            &path,
            r#"{
              "bookings": [{
                "id": 40,
                "first_name": "Ana",
                "last_name": "Reyes",
                "check_in": "2024-03-01T06:00:00Z",
                "check_out": "2024-03-04T04:00:00Z",
                "status": "confirmed"
              }]
            }"#,
        )
        .unwrap();

        let store = MemoryStore::open(&path).await.unwrap();
        assert_eq!(store.list_bookings(now()).await.unwrap().len(), 1);
        let source = store
            .insert_source("Airbnb", "https://a.example/feed.ics")
            .await
            .unwrap();
        assert_eq!(source.id, 41);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roomsync.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            MemoryStore::open(&path).await,
            Err(StoreError::Serialization(_))
        ));
    }
}
