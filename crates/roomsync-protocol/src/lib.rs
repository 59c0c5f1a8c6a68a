//! IPC framing and request/response types for roomsync.
//!
//! The daemon and the CLI talk over a Unix socket using length-prefixed
//! JSON:
//! - 4 bytes: message length (u32, big-endian)
//! - N bytes: JSON payload
//!
//! Every message is wrapped in an [`Envelope`] carrying the protocol
//! version and a request id used to correlate responses.

mod error;
mod framing;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use framing::{decode_message, encode_message, read_frame, write_frame};
pub use types::{
    Envelope, ErrorCode, ErrorResponse, Request, Response, SourceStatus, SourceSyncResult,
    StatusInfo, SyncOutcome, SyncReport, SyncStage,
};

/// Protocol version constant.
pub const PROTOCOL_VERSION: &str = "1";

/// Maximum message size (1 MB).
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;
