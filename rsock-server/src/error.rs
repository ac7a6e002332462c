//! Server error types.

use crate::config::ConfigError;
use rsock_protocol::{ErrorCode, FrameType, TransportError};
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] rsock_protocol::ProtocolError),

    #[error("write failed: {0}")]
    Write(#[source] TransportError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("a handler for {0} is already registered")]
    DuplicateHandlerRegistration(FrameType),

    #[error("invalid frame type: {0:#06x}")]
    InvalidFrameType(u16),

    #[error("{frame_type} requires a {expected} handler")]
    HandlerMismatch {
        frame_type: FrameType,
        expected: &'static str,
    },

    #[error("a stream response can only complete once")]
    DoubleCompletion,

    #[error("connection {0} is already set up")]
    DuplicateSetup(u64),

    #[error("unknown connection {0}")]
    UnknownConnection(u64),

    #[error("server closed")]
    Closed,
}

impl ServerError {
    /// Converts to the wire error code sent to a peer.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ServerError::Protocol(_) => ErrorCode::Invalid,
            ServerError::DuplicateSetup(_) => ErrorCode::InvalidSetup,
            ServerError::Io(_) | ServerError::Write(_) => ErrorCode::ConnectionError,
            ServerError::Closed => ErrorCode::Rejected,
            _ => ErrorCode::ApplicationError,
        }
    }
}
