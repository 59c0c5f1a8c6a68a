//! Unix socket client for talking to the roomsync daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;
use tracing::{debug, warn};
use uuid::Uuid;

use roomsync_protocol::{Envelope, ProtocolError, Request, Response, read_frame, write_frame};

use crate::error::{ClientError, ClientResult};

/// Client for the daemon socket. Each request uses a fresh connection.
pub struct SocketClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl SocketClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    /// A client for the default socket path.
    pub fn with_defaults() -> Self {
        Self::new(roomsync_server::default_socket_path(), Duration::from_secs(30))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Checks if the daemon socket exists.
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Sends a request and returns the raw response.
    pub async fn send(&self, request: Request) -> ClientResult<Response> {
        let request_id = Uuid::new_v4().to_string();
        let kind = request.kind();
        let envelope = Envelope::request(&request_id, request);

        debug!(
            socket = %self.socket_path.display(),
            request_id = %request_id,
            request = kind,
            "connecting to daemon"
        );

        let mut stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| {
                ClientError::Connection(format!(
                    "connection timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                ClientError::Connection(format!(
                    "failed to connect to {} ({}); is `roomsync server` running?",
                    self.socket_path.display(),
                    e
                ))
            })?;

        tokio::time::timeout(self.timeout, write_frame(&mut stream, &envelope))
            .await
            .map_err(|_| ClientError::Timeout("sending request".into()))?
            .map_err(protocol_error)?;

        let response: Envelope<Response> =
            tokio::time::timeout(self.timeout, read_frame(&mut stream))
                .await
                .map_err(|_| ClientError::Timeout(format!("waiting for {kind} response")))?
                .map_err(protocol_error)?
                .ok_or_else(|| {
                    ClientError::Connection("daemon closed the connection".into())
                })?;

        if response.request_id != request_id {
            warn!(
                expected = %request_id,
                received = %response.request_id,
                "response request_id mismatch"
            );
        }
        debug!(request_id = %response.request_id, "response received");
        Ok(response.payload)
    }

    /// Sends a request, turning an error response into [`ClientError::Server`].
    pub async fn request(&self, request: Request) -> ClientResult<Response> {
        match self.send(request).await? {
            Response::Error { error } => Err(ClientError::Server(error)),
            response => Ok(response),
        }
    }

    /// Returns true if the daemon answers a ping.
    pub async fn ping(&self) -> bool {
        matches!(self.send(Request::Ping).await, Ok(Response::Pong))
    }
}

fn protocol_error(err: ProtocolError) -> ClientError {
    match err {
        ProtocolError::Io(e) => ClientError::Io(e),
        other => ClientError::Protocol(other.to_string()),
    }
}
