//! Server command: runs the daemon in the foreground.
//!
//! This module wires the daemon together:
//! - PID file (prevents duplicate instances)
//! - Signal handler (SIGTERM/SIGINT for shutdown, SIGHUP to reload the interval)
//! - Store snapshot, feed fetcher and availability cache
//! - Sync scheduler (periodic feed reconciliation)
//! - Socket server (IPC with clients)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use roomsync_providers::{FeedFetcher, HttpFeedFetcher};
use roomsync_server::{
    Aggregator, AvailabilityCache, MemoryStore, PidFile, ServerConfig, ServerState,
    SignalHandler, SocketServer, Store, SyncScheduler, default_pid_path,
    make_connection_handler, new_shared_state,
};

use crate::cli::Cli;
use crate::commands::remote::socket_path;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// How long a running sync pass may take to finish at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Starts the daemon in the foreground.
///
/// Blocks until SIGTERM/SIGINT or a Shutdown request.
pub async fn run(cli: &Cli, config: &ClientConfig) -> ClientResult<()> {
    let problems = config.validate();
    if !problems.is_empty() {
        return Err(ClientError::Config(problems.join("; ")));
    }
    let daemon = &config.daemon;
    let zone = daemon.zone().map_err(ClientError::Config)?;

    // 1. PID file
    let _pid_file = PidFile::create(default_pid_path())?;

    // 2. Signal handler
    let signals = SignalHandler::new();
    signals.spawn_listener();

    // 3. Store, fetcher, availability cache
    let state_path = daemon.state_path();
    let store: Arc<dyn Store> = open_store(&state_path).await?;
    info!(path = %state_path.display(), "Store opened");

    let fetcher: Arc<dyn FeedFetcher> = Arc::new(HttpFeedFetcher::new(daemon.fetcher_config())?);
    let aggregator = Aggregator::from_config(
        Arc::clone(&store),
        zone,
        &daemon.aggregator_config(),
        Arc::clone(&fetcher),
    );
    let cache = Arc::new(AvailabilityCache::new(aggregator, daemon.cache_ttl()));

    let mut state = ServerState::new(Arc::clone(&store), Arc::clone(&cache), zone)
        .with_default_interval(daemon.default_interval_minutes)
        .with_export_options(config.export.clone())
        .with_shutdown_handle(signals.shutdown_handle());

    // 4. Scheduler
    let scheduler = if daemon.background_sync {
        let scheduler = Arc::new(
            SyncScheduler::new(
                Arc::clone(&store),
                fetcher,
                zone,
                daemon.scheduler_config(),
            )
            .with_cache(Arc::clone(&cache)),
        );
        let minutes = scheduler.start().await;
        info!(interval_minutes = minutes, "Background sync started");
        state = state.with_scheduler(Arc::clone(&scheduler));
        Some(scheduler)
    } else {
        info!("Background sync disabled, feeds are read on demand");
        None
    };

    // 5. SIGHUP re-reads the stored interval
    let mut reload = signals.reload();
    let reload_scheduler = scheduler.clone();
    let reload_task = tokio::spawn(async move {
        while reload.next().await {
            match &reload_scheduler {
                Some(scheduler) => {
                    let minutes = scheduler.reload().await;
                    info!(interval_minutes = minutes, "Sync interval reloaded");
                }
                None => info!("Background sync disabled, nothing to reload"),
            }
        }
    });

    // 6. Socket server
    let socket_path = socket_path(cli, config);
    let server = SocketServer::new(ServerConfig::new(&socket_path)).await?;
    info!(path = %socket_path.display(), timezone = zone.name(), "Server listening");

    let handler = make_connection_handler(new_shared_state(state));
    server
        .run_until_shutdown(handler, signals.shutdown().wait())
        .await?;

    info!("Shutting down...");
    reload_task.abort();
    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
        if !scheduler.wait_idle(SHUTDOWN_GRACE).await {
            warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "Sync pass still running at shutdown"
            );
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Opens the store snapshot, creating its directory first.
async fn open_store(path: &Path) -> ClientResult<Arc<dyn Store>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(Arc::new(MemoryStore::open(path).await?))
}
