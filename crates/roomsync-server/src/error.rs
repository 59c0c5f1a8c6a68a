//! Server error types.

use std::io;

use roomsync_protocol::{ErrorCode, ProtocolError};
use thiserror::Error;

use crate::store::StoreError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (socket, file, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (framing, encoding, etc.).
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The durable store rejected an operation.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A request carried arguments the server will not act on.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The record is owned by calendar sync.
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Background sync is switched off in the daemon configuration.
    #[error("Background sync is disabled")]
    SyncDisabled,

    /// Socket path already in use.
    #[error("Socket path already in use: {path}")]
    SocketInUse { path: String },

    /// Socket path parent directory does not exist.
    #[error("Socket path parent directory does not exist: {path}")]
    SocketPathInvalid { path: String },

    /// Server is already running.
    #[error("Server is already running (PID file exists: {path})")]
    AlreadyRunning { path: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Shutdown requested.
    #[error("Server shutdown requested")]
    Shutdown,
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a socket in use error.
    pub fn socket_in_use(path: impl Into<String>) -> Self {
        Self::SocketInUse { path: path.into() }
    }

    /// Creates a socket path invalid error.
    pub fn socket_path_invalid(path: impl Into<String>) -> Self {
        Self::SocketPathInvalid { path: path.into() }
    }

    /// Creates an already running error.
    pub fn already_running(path: impl Into<String>) -> Self {
        Self::AlreadyRunning { path: path.into() }
    }

    /// The wire error code reported to clients.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Store(StoreError::NotFound { .. }) => ErrorCode::NotFound,
            Self::Store(StoreError::Conflict(_) | StoreError::Invalid(_)) => {
                ErrorCode::InvalidRequest
            }
            Self::Store(_) => ErrorCode::StoreError,
            Self::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            Self::SyncDisabled => ErrorCode::SyncDisabled,
            Self::Shutdown => ErrorCode::ShuttingDown,
            Self::Protocol(ProtocolError::Timeout { .. }) => ErrorCode::Timeout,
            _ => ErrorCode::InternalError,
        }
    }
}
