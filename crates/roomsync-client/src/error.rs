//! Client error types.

use std::fmt;

use roomsync_protocol::ErrorResponse;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// IO error.
    Io(std::io::Error),
    /// Connection to the daemon failed.
    Connection(String),
    /// Protocol/framing error.
    Protocol(String),
    /// Request timed out.
    Timeout(String),
    /// The daemon answered with an error.
    Server(ErrorResponse),
    /// The daemon answered with a response this command did not expect.
    UnexpectedResponse(String),
    /// Running the daemon failed.
    Daemon(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Timeout(msg) => write!(f, "timeout: {}", msg),
            Self::Server(err) => write!(f, "{}", err.message),
            Self::UnexpectedResponse(kind) => write!(f, "unexpected response from daemon: {}", kind),
            Self::Daemon(msg) => write!(f, "daemon error: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Server(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<roomsync_server::ServerError> for ClientError {
    fn from(err: roomsync_server::ServerError) -> Self {
        Self::Daemon(err.to_string())
    }
}

impl From<roomsync_server::StoreError> for ClientError {
    fn from(err: roomsync_server::StoreError) -> Self {
        Self::Daemon(err.to_string())
    }
}

impl From<roomsync_providers::ProviderError> for ClientError {
    fn from(err: roomsync_providers::ProviderError) -> Self {
        Self::Config(err.to_string())
    }
}
