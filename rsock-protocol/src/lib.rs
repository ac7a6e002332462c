//! # rsock-protocol
//!
//! Wire protocol implementation for rsock, a reactive-streams protocol that
//! multiplexes request/response and request/stream interactions over one
//! connection.
//!
//! This crate provides:
//! - Fixed 12-byte frame header with packed type and flags
//! - Payload section with flag-gated, length-prefixed metadata
//! - Builders for SETUP, REQUEST_RESPONSE, REQUEST_STREAM, RESPONSE, ERROR and CANCEL frames
//! - Frame parser and a streaming decoder for byte-stream transports
//! - The outbound transport capability and drop diagnostics shared by both engines

pub mod builder;
pub mod codec;
pub mod diagnostic;
pub mod error;
pub mod frame;
pub mod header;
pub mod payload;
pub mod setup;
pub mod transport;

pub use builder::{
    build_frame, cancel_frame, error_frame, request_response_frame, request_stream_frame,
    response_frame, setup_frame,
};
pub use codec::FrameDecoder;
pub use diagnostic::{Diagnostic, DiagnosticHook, DiagnosticKind};
pub use error::{ErrorCode, ProtocolError, TransportError};
pub use frame::{is_completed, parse_frame, Frame, FrameBody};
pub use header::{encode_header, is_valid_frame_type, FrameFlags, FrameType, Header, HEADER_SIZE};
pub use payload::{encode_payload, Payload};
pub use setup::SetupParams;
pub use transport::{FrameSink, RecordingSink};

/// Protocol version written into SETUP frames.
pub const PROTOCOL_VERSION: u32 = 0;

/// Default port for rsock servers.
pub const DEFAULT_PORT: u16 = 7474;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;
