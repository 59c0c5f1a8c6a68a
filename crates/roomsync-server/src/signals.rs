//! Unix signal handling for the daemon.
//!
//! - SIGTERM/SIGINT: graceful shutdown
//! - SIGHUP: re-read the sync interval setting and reschedule

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

/// Fans Unix signals out to watch channels.
///
/// Shutdown is a latch. Reload is a counter so that every SIGHUP is seen
/// by a waiting [`ReloadSignal`], even several in a row.
pub struct SignalHandler {
    shutdown_tx: Arc<watch::Sender<bool>>,
    reload_tx: Arc<watch::Sender<u64>>,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHandler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (reload_tx, _) = watch::channel(0);
        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            reload_tx: Arc::new(reload_tx),
        }
    }

    /// Spawns the signal listener task.
    ///
    /// If a handler cannot be installed the error is logged and the daemon
    /// keeps running; it can still be stopped with a Shutdown request.
    #[cfg(unix)]
    pub fn spawn_listener(&self) {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_tx = Arc::clone(&self.shutdown_tx);
        let reload_tx = Arc::clone(&self.reload_tx);

        tokio::spawn(async move {
            let installed = (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
                signal(SignalKind::hangup()),
            );
            let (mut sigterm, mut sigint, mut sighup) = match installed {
                (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
                (term, int, hup) => {
                    let e = [term.err(), int.err(), hup.err()].into_iter().flatten().next();
                    error!(error = ?e, "Failed to install signal handlers");
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating shutdown");
                        shutdown_tx.send_replace(true);
                        break;
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT, initiating shutdown");
                        shutdown_tx.send_replace(true);
                        break;
                    }
                    _ = sighup.recv() => {
                        info!("Received SIGHUP, reloading sync interval");
                        reload_tx.send_modify(|n| *n += 1);
                    }
                }
            }

            debug!("Signal listener stopped");
        });
    }

    /// Non-Unix: Ctrl+C only.
    #[cfg(not(unix))]
    pub fn spawn_listener(&self) {
        let shutdown_tx = Arc::clone(&self.shutdown_tx);

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received Ctrl+C, initiating shutdown");
                shutdown_tx.send_replace(true);
            }
        });
    }

    /// Returns a future that completes when shutdown is signaled.
    pub fn shutdown(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    /// Returns a stream of reload signals.
    pub fn reload(&self) -> ReloadSignal {
        ReloadSignal {
            rx: self.reload_tx.subscribe(),
        }
    }

    /// Returns true if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Programmatically triggers a shutdown.
    pub fn trigger_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Programmatically triggers a reload.
    pub fn trigger_reload(&self) {
        self.reload_tx.send_modify(|n| *n += 1);
    }

    /// A cloneable handle for components that may request shutdown.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }
}

/// Completes once shutdown is signaled.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Waits for the shutdown signal.
    ///
    /// Also returns if every sender is gone.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|down| *down).await;
    }
}

/// Yields once per reload signal.
pub struct ReloadSignal {
    rx: watch::Receiver<u64>,
}

impl ReloadSignal {
    /// Waits for the next reload signal.
    ///
    /// Returns `false` once the handler is gone.
    pub async fn next(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// A handle for triggering or checking shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Triggers a shutdown.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a future that completes when shutdown is triggered.
    pub fn wait(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}
