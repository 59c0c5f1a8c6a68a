//! Request/response dispatch.
//!
//! [`RequestHandler`] maps each protocol [`Request`] onto the store,
//! scheduler and availability cache held in [`ServerState`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::NaiveDate;
use roomsync_core::{
    BlockDraft, CalendarExport, DayRange, DisplayZone, ExportOptions, MAX_SYNC_INTERVAL_MINUTES,
    MIN_SYNC_INTERVAL_MINUTES, RecordId, SYNC_INTERVAL_KEY, SyncSetting, clamp_sync_interval,
    conflicts,
};
use roomsync_protocol::{Request, Response, SourceStatus, StatusInfo, SyncOutcome};
use roomsync_providers::validate_feed_url;
use tracing::{Span, debug, info, warn};

use crate::cache::AvailabilityCache;
use crate::clock::{Clock, system_clock};
use crate::error::{ServerError, ServerResult};
use crate::scheduler::{SchedulerConfig, SyncScheduler};
use crate::signals::ShutdownHandle;
use crate::socket::Connection;
use crate::store::Store;

/// Everything a request may touch, shared by all connections.
pub struct ServerState {
    store: Arc<dyn Store>,
    cache: Arc<AvailabilityCache>,
    zone: DisplayZone,
    scheduler: Option<Arc<SyncScheduler>>,
    default_interval_minutes: u64,
    export: ExportOptions,
    clock: Clock,
    shutdown: Option<ShutdownHandle>,
    started: Instant,
    shutdown_requested: AtomicBool,
}

impl ServerState {
    pub fn new(store: Arc<dyn Store>, cache: Arc<AvailabilityCache>, zone: DisplayZone) -> Self {
        Self {
            store,
            cache,
            zone,
            scheduler: None,
            default_interval_minutes: SchedulerConfig::default().default_interval_minutes,
            export: ExportOptions::default(),
            clock: system_clock(),
            shutdown: None,
            started: Instant::now(),
            shutdown_requested: AtomicBool::new(false),
        }
    }

    /// Builder: enable sync requests through `scheduler`.
    pub fn with_scheduler(mut self, scheduler: Arc<SyncScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Builder: interval reported when none is stored.
    pub fn with_default_interval(mut self, minutes: u64) -> Self {
        self.default_interval_minutes = clamp_sync_interval(minutes);
        self
    }

    /// Builder: set calendar export options.
    pub fn with_export_options(mut self, export: ExportOptions) -> Self {
        self.export = export;
        self
    }

    /// Builder: use `clock` for "today" and export stamps.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Builder: let Shutdown requests stop the daemon.
    pub fn with_shutdown_handle(mut self, handle: ShutdownHandle) -> Self {
        self.shutdown = Some(handle);
        self
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        if let Some(handle) = &self.shutdown {
            handle.trigger();
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    fn today(&self) -> NaiveDate {
        self.zone.today((self.clock)())
    }
}

/// Server state shared across all connections.
pub type SharedState = Arc<ServerState>;

/// Wraps `state` for sharing.
pub fn new_shared_state(state: ServerState) -> SharedState {
    Arc::new(state)
}

/// Routes requests to their operations.
pub struct RequestHandler {
    state: SharedState,
}

impl RequestHandler {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Handles one request. Failures become [`Response::Error`].
    #[tracing::instrument(skip(self), fields(request_type, duration_ms))]
    pub async fn handle(&self, request: &Request) -> Response {
        let start = Instant::now();
        Span::current().record("request_type", request.kind());

        let response = match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Request failed");
                Response::error(e.error_code(), e.to_string())
            }
        };

        let duration = start.elapsed();
        Span::current().record("duration_ms", duration.as_millis());
        debug!(duration_ms = duration.as_millis(), "Request handled");
        response
    }

    async fn dispatch(&self, request: &Request) -> ServerResult<Response> {
        match request {
            Request::Ping => Ok(Response::Pong),
            Request::Status => self.status().await,
            Request::GetAvailability => {
                let intervals = self.state.cache.get().await?;
                Ok(Response::Availability { intervals })
            }
            Request::CheckAvailability { start, end } => {
                self.check_availability(*start, *end).await
            }
            Request::ExportCalendar => self.export_calendar().await,
            Request::SyncNow => {
                let report = self.scheduler()?.run_once().await;
                Ok(report.map_or(Response::SyncSkipped, |report| Response::SyncReport {
                    report,
                }))
            }
            Request::SyncSource { id } => {
                let report = self.scheduler()?.run_source(*id).await?;
                Ok(report.map_or(Response::SyncSkipped, |report| Response::SyncReport {
                    report,
                }))
            }
            Request::GetSyncInterval => Ok(Response::SyncInterval {
                minutes: self.interval().await?,
            }),
            Request::SetSyncInterval { minutes } => self.set_interval(*minutes).await,
            Request::ListSources => Ok(Response::Sources {
                sources: self.state.store.list_sources().await?,
            }),
            Request::AddSource { name, url } => self.add_source(name, url).await,
            Request::SetSourceActive { id, active } => {
                let source = self.state.store.set_source_active(*id, *active).await?;
                info!(source = %source.name, active, "Source toggled");
                self.state.cache.invalidate().await;
                Ok(Response::Source { source })
            }
            Request::RemoveSource { id } => self.remove_source(*id).await,
            Request::ListBlocks { all } => {
                let from = (!*all).then(|| self.state.today());
                Ok(Response::Blocks {
                    blocks: self.state.store.list_blocks(from).await?,
                })
            }
            Request::AddBlock { start, end, reason } => self.add_block(*start, *end, reason).await,
            Request::RemoveBlock { id } => self.remove_block(*id).await,
            Request::Shutdown => {
                info!("Shutdown requested by client");
                self.state.request_shutdown();
                Ok(Response::Ok)
            }
        }
    }

    fn scheduler(&self) -> ServerResult<&Arc<SyncScheduler>> {
        self.state.scheduler.as_ref().ok_or(ServerError::SyncDisabled)
    }

    async fn status(&self) -> ServerResult<Response> {
        let state = &self.state;
        let mut info = StatusInfo::new(state.uptime_seconds(), state.zone.name());
        info.cache_age_seconds = state.cache.age().await.map(|age| age.as_secs());

        if let Some(scheduler) = &state.scheduler {
            let sched = scheduler.state();
            let sched = sched.read().await;
            info.scheduler_armed = sched.armed;
            info.interval_minutes = sched.interval_minutes;
            info.last_report = sched.last_report.clone();
            info.sync_running = scheduler.is_running();
        }

        for source in state.store.list_sources().await? {
            let error = info
                .last_report
                .as_ref()
                .and_then(|report| report.sources.iter().find(|r| r.source_id == source.id))
                .and_then(|result| match &result.outcome {
                    SyncOutcome::Failed { error, .. } => Some(error.clone()),
                    SyncOutcome::Synced { .. } => None,
                });
            info.sources.push(SourceStatus {
                id: source.id,
                name: source.name,
                active: source.active,
                last_sync: source.last_sync,
                error,
            });
        }
        Ok(Response::status(info))
    }

    async fn check_availability(&self, start: NaiveDate, end: NaiveDate) -> ServerResult<Response> {
        if start >= end {
            return Err(ServerError::invalid(format!(
                "check-out {end} must be after check-in {start}"
            )));
        }
        let intervals = self.state.cache.get().await?;
        let conflicts: Vec<_> = conflicts(&intervals, &DayRange::new(start, end))
            .into_iter()
            .cloned()
            .collect();
        Ok(Response::AvailabilityCheck {
            available: conflicts.is_empty(),
            conflicts,
        })
    }

    async fn export_calendar(&self) -> ServerResult<Response> {
        let state = &self.state;
        let now = (state.clock)();
        let today = state.zone.today(now);
        let (bookings, blocks) = tokio::try_join!(
            state.store.list_bookings(state.zone.day_start(today)),
            state.store.list_blocks(Some(today)),
        )?;
        let ics = CalendarExport::new(state.export.clone(), state.zone)
            .render(&bookings, &blocks, now);
        Ok(Response::Calendar { ics })
    }

    async fn interval(&self) -> ServerResult<u64> {
        let stored = self.state.store.get_setting(SYNC_INTERVAL_KEY).await?;
        Ok(stored
            .and_then(|setting| setting.interval_minutes())
            .unwrap_or(self.state.default_interval_minutes))
    }

    async fn set_interval(&self, minutes: u64) -> ServerResult<Response> {
        if !(MIN_SYNC_INTERVAL_MINUTES..=MAX_SYNC_INTERVAL_MINUTES).contains(&minutes) {
            return Err(ServerError::invalid(format!(
                "sync interval must be between {MIN_SYNC_INTERVAL_MINUTES} and \
                 {MAX_SYNC_INTERVAL_MINUTES} minutes"
            )));
        }
        self.state
            .store
            .put_setting(SyncSetting::interval(minutes))
            .await?;
        if let Some(scheduler) = &self.state.scheduler {
            scheduler.reschedule(minutes).await;
        }
        info!(minutes, "Sync interval updated");
        Ok(Response::SyncInterval { minutes })
    }

    async fn add_source(&self, name: &str, url: &str) -> ServerResult<Response> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServerError::invalid("source name must not be empty"));
        }
        validate_feed_url(url).map_err(|e| ServerError::invalid(e.to_string()))?;

        let source = self.state.store.insert_source(name, url.trim()).await?;
        info!(source = %source.name, id = source.id, "Source added");
        self.state.cache.invalidate().await;
        Ok(Response::Source { source })
    }

    async fn remove_source(&self, id: RecordId) -> ServerResult<Response> {
        let source = self.state.store.delete_source(id).await?;
        let pruned = self
            .state
            .store
            .prune_source_blocks(&source.name, None)
            .await?;
        info!(source = %source.name, pruned, "Source removed");
        self.state.cache.invalidate().await;
        Ok(Response::Source { source })
    }

    async fn add_block(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        reason: &str,
    ) -> ServerResult<Response> {
        if start > end {
            return Err(ServerError::invalid(format!(
                "block end {end} is before its start {start}"
            )));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServerError::invalid("block reason must not be empty"));
        }

        let block = self
            .state
            .store
            .insert_block(BlockDraft::manual(start, end, reason), (self.state.clock)())
            .await?;
        info!(id = block.id, %start, %end, "Manual block added");
        self.state.cache.invalidate().await;
        Ok(Response::Block { block })
    }

    async fn remove_block(&self, id: RecordId) -> ServerResult<Response> {
        let block = self.state.store.get_block(id).await?;
        if !block.is_manual() {
            return Err(ServerError::forbidden(format!(
                "range {id} is owned by {}",
                block.source.as_deref().unwrap_or("calendar sync")
            )));
        }
        let block = self.state.store.delete_block(id).await?;
        info!(id, "Manual block removed");
        self.state.cache.invalidate().await;
        Ok(Response::Block { block })
    }

    /// Serves requests on `conn` until the client disconnects.
    ///
    /// Returns [`ServerError::Shutdown`] after answering a Shutdown request.
    pub async fn handle_connection(&self, mut conn: Connection) -> ServerResult<()> {
        loop {
            match conn.read_request().await {
                Ok(Some(envelope)) => {
                    let response = self.handle(&envelope.payload).await;
                    conn.respond(&envelope.request_id, response).await?;

                    if self.state.shutdown_requested() {
                        return Err(ServerError::Shutdown);
                    }
                }
                Ok(None) => {
                    debug!("Client disconnected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "Error reading request");
                    return Err(e);
                }
            }
        }
    }
}

/// Builds the per-connection closure for [`SocketServer::run`].
///
/// [`SocketServer::run`]: crate::SocketServer::run
pub fn make_connection_handler(
    state: SharedState,
) -> impl Fn(Connection) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
    move |conn| {
        let handler = RequestHandler::new(Arc::clone(&state));
        Box::pin(async move {
            if let Err(e) = handler.handle_connection(conn).await
                && !matches!(e, ServerError::Shutdown)
            {
                warn!(error = %e, "Connection handler error");
            }
        })
    }
}
