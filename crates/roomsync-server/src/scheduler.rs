//! Background sync scheduler.
//!
//! One [`SyncScheduler`] owns the recurring timer and the single-flight
//! guard. Each pass fetches every active source and reconciles it; a
//! failure in one source is recorded in the [`SyncReport`] and the pass
//! carries on with the rest.
//!
//! The interval setting is read once when the timer is armed. Changing it
//! takes an explicit [`SyncScheduler::reschedule`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use roomsync_core::{
    CalendarSource, DEFAULT_SYNC_INTERVAL_MINUTES, DisplayZone, RecordId, SYNC_INTERVAL_KEY,
    clamp_sync_interval,
};
use roomsync_protocol::{SourceSyncResult, SyncOutcome, SyncReport, SyncStage};
use roomsync_providers::FeedFetcher;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::AvailabilityCache;
use crate::clock::{Clock, system_clock};
use crate::reconcile::Reconciler;
use crate::store::{Store, StoreError, StoreResult};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval used when the stored setting is missing or unusable.
    pub default_interval_minutes: u64,
    /// How many sources are synced at once within a pass.
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
            concurrency: 1,
        }
    }
}

impl SchedulerConfig {
    /// Builder: set the fallback interval.
    pub fn with_default_interval(mut self, minutes: u64) -> Self {
        self.default_interval_minutes = clamp_sync_interval(minutes);
        self
    }

    /// Builder: set per-pass source concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Scheduler state visible to status requests.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    /// Whether the recurring timer is armed.
    pub armed: bool,
    /// Interval the timer is armed with.
    pub interval_minutes: Option<u64>,
    /// The most recent completed pass.
    pub last_report: Option<SyncReport>,
    /// Passes skipped because another was in flight.
    pub skipped_runs: u64,
}

/// Shared scheduler state.
pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

struct Timer {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    minutes: u64,
}

/// Clears the running flag on every exit path of a pass.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    running_tx: &'a watch::Sender<bool>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.running_tx.send_replace(false);
    }
}

/// Drives periodic reconciliation of all active sources.
pub struct SyncScheduler {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn FeedFetcher>,
    reconciler: Reconciler,
    config: SchedulerConfig,
    clock: Clock,
    cache: Option<Arc<AvailabilityCache>>,
    running: AtomicBool,
    running_tx: watch::Sender<bool>,
    state: SharedSchedulerState,
    timer: Mutex<Option<Timer>>,
}

impl SyncScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn FeedFetcher>,
        zone: DisplayZone,
        config: SchedulerConfig,
    ) -> Self {
        let (running_tx, _) = watch::channel(false);
        Self {
            reconciler: Reconciler::new(Arc::clone(&store), zone),
            store,
            fetcher,
            config,
            clock: system_clock(),
            cache: None,
            running: AtomicBool::new(false),
            running_tx,
            state: Arc::new(RwLock::new(SchedulerState::default())),
            timer: Mutex::new(None),
        }
    }

    /// Builder: use `clock` for sync timestamps and "today".
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Builder: invalidate `cache` after every pass.
    pub fn with_cache(mut self, cache: Arc<AvailabilityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Returns the shared state.
    pub fn state(&self) -> SharedSchedulerState {
        Arc::clone(&self.state)
    }

    /// Returns true while a pass is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Arms the recurring timer and fires the first pass immediately.
    ///
    /// Reads the interval setting once. Calling this while armed does
    /// nothing. Returns the armed interval.
    pub async fn start(self: &Arc<Self>) -> u64 {
        let mut timer = self.timer.lock().await;
        if let Some(armed) = timer.as_ref() {
            debug!(minutes = armed.minutes, "Scheduler already armed");
            return armed.minutes;
        }

        let minutes = self.read_interval().await;
        *timer = Some(self.arm(minutes, true));
        self.record_armed(Some(minutes)).await;
        info!(interval_minutes = minutes, "Sync scheduler started");
        minutes
    }

    /// Replaces the armed timer with one at `minutes`.
    ///
    /// The first tick of the new timer comes one full interval from now.
    pub async fn reschedule(self: &Arc<Self>, minutes: u64) {
        let minutes = clamp_sync_interval(minutes);
        let mut timer = self.timer.lock().await;
        if let Some(old) = timer.take() {
            Self::disarm(old).await;
        }
        *timer = Some(self.arm(minutes, false));
        self.record_armed(Some(minutes)).await;
        info!(interval_minutes = minutes, "Sync scheduler rescheduled");
    }

    /// Re-reads the interval setting and reschedules with it.
    pub async fn reload(self: &Arc<Self>) -> u64 {
        let minutes = self.read_interval().await;
        self.reschedule(minutes).await;
        minutes
    }

    /// Disarms the timer. A pass already in flight keeps running; use
    /// [`wait_idle`](Self::wait_idle) to wait for it.
    pub async fn stop(&self) {
        if let Some(old) = self.timer.lock().await.take() {
            Self::disarm(old).await;
            info!("Sync scheduler stopped");
        }
        self.record_armed(None).await;
    }

    /// Waits up to `timeout` for an in-flight pass to finish.
    ///
    /// Returns true if no pass is running afterwards.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.running_tx.subscribe();
        let idle = tokio::time::timeout(timeout, rx.wait_for(|running| !*running)).await;
        matches!(idle, Ok(Ok(_)))
    }

    /// Runs one pass over all active sources.
    ///
    /// Returns `None` without doing anything if a pass is already running.
    pub async fn run_once(&self) -> Option<SyncReport> {
        let Some(_guard) = self.try_begin() else {
            self.record_skip().await;
            return None;
        };

        let started_at = (self.clock)();
        let sources = match self.store.list_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                error!(error = %e, "Could not list calendar sources");
                let report = SyncReport {
                    started_at,
                    finished_at: (self.clock)(),
                    sources: Vec::new(),
                    error: Some(e.to_string()),
                };
                self.finish(&report).await;
                return Some(report);
            }
        };

        let active: Vec<CalendarSource> = sources.into_iter().filter(|s| s.active).collect();
        debug!(sources = active.len(), "Starting sync pass");

        let mut results: Vec<SourceSyncResult> = stream::iter(active)
            .map(|source| self.sync_source(source))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|r| r.source_id);

        let report = SyncReport {
            started_at,
            finished_at: (self.clock)(),
            sources: results,
            error: None,
        };
        info!(
            sources = report.sources.len(),
            failures = report.failures(),
            "Sync pass finished"
        );
        self.finish(&report).await;
        Some(report)
    }

    /// Runs a pass for one source, under the same guard as [`run_once`].
    ///
    /// Returns `Ok(None)` if a pass is already running.
    ///
    /// [`run_once`]: Self::run_once
    pub async fn run_source(&self, id: RecordId) -> StoreResult<Option<SyncReport>> {
        let source = self.store.get_source(id).await?;
        if !source.active {
            return Err(StoreError::Invalid(format!(
                "source '{}' is disabled",
                source.name
            )));
        }

        let Some(_guard) = self.try_begin() else {
            self.record_skip().await;
            return Ok(None);
        };

        let started_at = (self.clock)();
        let result = self.sync_source(source).await;
        let report = SyncReport {
            started_at,
            finished_at: (self.clock)(),
            sources: vec![result],
            error: None,
        };
        self.finish(&report).await;
        Ok(Some(report))
    }

    async fn sync_source(&self, source: CalendarSource) -> SourceSyncResult {
        let outcome = match self.fetcher.fetch(&source.url).await {
            Err(e) => {
                warn!(source = %source.name, error = %e, "Feed fetch failed");
                SyncOutcome::Failed {
                    stage: SyncStage::Fetch,
                    error: e.to_string(),
                }
            }
            Ok(events) => {
                let now = (self.clock)();
                match self.reconciler.reconcile(&source, &events, now).await {
                    Ok(stats) => SyncOutcome::Synced {
                        events: stats.events,
                        created: stats.created,
                        updated: stats.updated,
                        pruned: stats.pruned,
                    },
                    Err(e) => {
                        error!(source = %source.name, error = %e, "Reconciliation failed");
                        SyncOutcome::Failed {
                            stage: e.stage,
                            error: e.source.to_string(),
                        }
                    }
                }
            }
        };
        SourceSyncResult {
            source_id: source.id,
            source: source.name,
            outcome,
        }
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.running_tx.send_replace(true);
        Some(RunGuard {
            running: &self.running,
            running_tx: &self.running_tx,
        })
    }

    async fn finish(&self, report: &SyncReport) {
        self.state.write().await.last_report = Some(report.clone());
        if let Some(cache) = &self.cache {
            cache.invalidate().await;
        }
    }

    async fn record_skip(&self) {
        debug!("Sync already running, skipping");
        self.state.write().await.skipped_runs += 1;
    }

    async fn record_armed(&self, minutes: Option<u64>) {
        let mut state = self.state.write().await;
        state.armed = minutes.is_some();
        state.interval_minutes = minutes;
    }

    async fn read_interval(&self) -> u64 {
        let fallback = clamp_sync_interval(self.config.default_interval_minutes);
        match self.store.get_setting(SYNC_INTERVAL_KEY).await {
            Ok(Some(setting)) => setting.interval_minutes().unwrap_or_else(|| {
                warn!(value = %setting.value, fallback, "Unusable sync interval setting");
                fallback
            }),
            Ok(None) => fallback,
            Err(e) => {
                warn!(error = %e, fallback, "Could not read sync interval setting");
                fallback
            }
        }
    }

    fn arm(self: &Arc<Self>, minutes: u64, immediate: bool) -> Timer {
        let period = Duration::from_secs(clamp_sync_interval(minutes).saturating_mul(60));
        let first = if immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(scheduler) = scheduler.upgrade() else {
                            break;
                        };
                        tokio::spawn(async move {
                            scheduler.run_once().await;
                        });
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("Sync timer stopped");
        });

        Timer {
            stop_tx,
            task,
            minutes,
        }
    }

    async fn disarm(timer: Timer) {
        let _ = timer.stop_tx.send(true);
        if let Err(e) = timer.task.await {
            warn!(error = %e, "Sync timer task ended abnormally");
        }
    }
}
