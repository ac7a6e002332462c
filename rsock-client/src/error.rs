//! Client error types.

use rsock_protocol::{ErrorCode, ProtocolError, TransportError};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("write failed: {0}")]
    Write(#[source] TransportError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("client closed")]
    Closed,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request on stream {stream_id} timed out")]
    Timeout { stream_id: u32 },

    #[error("server error: {code} - {message}")]
    Remote { code: ErrorCode, message: String },

    #[error("stream ids exhausted")]
    StreamIdsExhausted,
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Write(_) => true,
            ClientError::Transport(_) => true,
            ClientError::ConnectionClosed => true,
            ClientError::Timeout { .. } => true,
            ClientError::Remote { code, .. } => {
                matches!(code, ErrorCode::Rejected | ErrorCode::ConnectionError)
            }
            _ => false,
        }
    }
}
