//! The roomsync daemon.
//!
//! This crate holds everything that runs inside `roomsync server`:
//! - the durable [`Store`] and its in-memory/JSON implementation
//! - the [`Reconciler`] that turns feed events into blocked ranges
//! - the [`SyncScheduler`] driving periodic reconciliation
//! - the [`Aggregator`] and its [`AvailabilityCache`]
//! - Unix socket IPC, signals and the PID file
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use roomsync_core::DisplayZone;
//! use roomsync_server::{
//!     Aggregator, AvailabilityCache, DEFAULT_CACHE_TTL, MemoryStore, ServerConfig,
//!     ServerState, SignalHandler, SocketServer, make_connection_handler, new_shared_state,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::open("/var/lib/roomsync/state.json").await?);
//!     let zone = DisplayZone::default();
//!     let cache = Arc::new(AvailabilityCache::new(
//!         Aggregator::new(store.clone(), zone),
//!         DEFAULT_CACHE_TTL,
//!     ));
//!     let signals = SignalHandler::new();
//!     signals.spawn_listener();
//!     let state = new_shared_state(
//!         ServerState::new(store, cache, zone).with_shutdown_handle(signals.shutdown_handle()),
//!     );
//!
//!     let server = SocketServer::new(ServerConfig::default()).await?;
//!     server
//!         .run_until_shutdown(make_connection_handler(state), signals.shutdown().wait())
//!         .await?;
//!     Ok(())
//! }
//! ```

mod aggregate;
mod cache;
mod clock;
mod config;
mod error;
mod handler;
mod pidfile;
mod reconcile;
mod scheduler;
mod signals;
mod socket;
mod store;

pub use aggregate::{Aggregator, AggregatorConfig};
pub use cache::{AvailabilityCache, CacheEntry, CachedFeedFetcher, DEFAULT_CACHE_TTL, TtlCache};
pub use clock::{Clock, system_clock};
pub use config::{ServerConfig, default_socket_path};
pub use error::{ServerError, ServerResult};
pub use handler::{
    RequestHandler, ServerState, SharedState, make_connection_handler, new_shared_state,
};
pub use pidfile::{PidFile, default_pid_path, read_pid};
pub use reconcile::{ReconcileError, ReconcileStats, Reconciler, external_id};
pub use scheduler::{SchedulerConfig, SchedulerState, SharedSchedulerState, SyncScheduler};
pub use signals::{ReloadSignal, ShutdownHandle, ShutdownSignal, SignalHandler};
pub use socket::{Connection, SocketServer};
pub use store::{MemoryStore, Store, StoreError, StoreResult, Upserted};
