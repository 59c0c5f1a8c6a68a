//! Unix socket listener for IPC.
//!
//! Each connection carries any number of framed request/response pairs; see
//! `roomsync_protocol` for the wire format.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use roomsync_protocol::{
    Envelope, PROTOCOL_VERSION, ProtocolError, Request, Response, read_frame, write_frame,
};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Listens on the daemon socket and hands out connections.
pub struct SocketServer {
    config: ServerConfig,
    listener: UnixListener,
    connection_semaphore: Arc<Semaphore>,
}

impl SocketServer {
    /// Binds the socket described by `config`.
    ///
    /// A leftover socket file nobody answers on is removed when
    /// `cleanup_stale_socket` is set. A live one is always an error.
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        let socket_path = &config.socket_path;

        if let Some(parent) = socket_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            return Err(ServerError::socket_path_invalid(
                parent.to_string_lossy(),
            ));
        }

        if socket_path.exists() {
            if !config.cleanup_stale_socket || UnixStream::connect(socket_path).await.is_ok() {
                return Err(ServerError::socket_in_use(socket_path.to_string_lossy()));
            }
            info!(path = %socket_path.display(), "Removing stale socket");
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(path = %socket_path.display(), "Socket server listening");

        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self {
            config,
            listener,
            connection_semaphore,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Accepts one connection once a connection slot is free.
    pub async fn accept(&self) -> ServerResult<Connection> {
        let permit = Arc::clone(&self.connection_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Shutdown)?;

        let (stream, _addr) = self.listener.accept().await?;
        debug!("Accepted connection");

        Ok(Connection {
            stream,
            timeout: self.config.connection_timeout,
            _permit: permit,
        })
    }

    /// Accepts connections forever, spawning `handler` for each.
    async fn accept_loop<F, Fut>(&self, handler: F) -> ServerResult<()>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.accept().await {
                Ok(connection) => {
                    tokio::spawn(handler(connection));
                }
                Err(ServerError::Shutdown) => return Err(ServerError::Shutdown),
                Err(e) => error!(error = %e, "Failed to accept connection"),
            }
        }
    }

    /// Spawns `handler` for every accepted connection until `shutdown`
    /// completes. Connections already spawned keep running.
    pub async fn run_until_shutdown<F, Fut, S>(&self, handler: F, shutdown: S) -> ServerResult<()>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.accept_loop(handler) => result,
            _ = shutdown => {
                info!("Socket server stopping");
                Ok(())
            }
        }
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        let path = &self.config.socket_path;
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed socket file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove socket file"),
        }
    }
}

/// One client connection.
pub struct Connection {
    stream: UnixStream,
    timeout: Duration,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    /// Reads the next request envelope.
    ///
    /// Returns `Ok(None)` if the client closed the connection cleanly.
    pub async fn read_request(&mut self) -> ServerResult<Option<Envelope<Request>>> {
        let envelope: Option<Envelope<Request>> =
            tokio::time::timeout(self.timeout, read_frame(&mut self.stream))
                .await
                .map_err(|_| ProtocolError::timeout("read request"))??;

        if let Some(envelope) = &envelope
            && !envelope.is_compatible()
        {
            warn!(
                version = %envelope.protocol_version,
                expected = %PROTOCOL_VERSION,
                "Incompatible protocol version"
            );
        }
        Ok(envelope)
    }

    /// Writes a response envelope.
    pub async fn write_response(&mut self, envelope: &Envelope<Response>) -> ServerResult<()> {
        tokio::time::timeout(self.timeout, write_frame(&mut self.stream, envelope))
            .await
            .map_err(|_| ProtocolError::timeout("write response"))??;
        Ok(())
    }

    /// Sends `response` correlated to `request_id`.
    pub async fn respond(
        &mut self,
        request_id: impl Into<String>,
        response: Response,
    ) -> ServerResult<()> {
        let envelope = Envelope::response(request_id, response);
        self.write_response(&envelope).await
    }
}
