//! Frame builders.
//!
//! Every builder writes the 12-byte header, then any type-specific fixed
//! fields, then the generic payload section. The header `length` always
//! equals the number of bytes after the header, and the METADATA flag is
//! set exactly when [`Payload::has_metadata`] is true.

use crate::error::{ErrorCode, ProtocolError};
use crate::header::{encode_header, FrameFlags, FrameType, HEADER_SIZE};
use crate::payload::Payload;
use crate::setup::SetupParams;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{BufMut, Bytes, BytesMut};

/// Builds the SETUP frame that must open every connection.
pub fn setup_frame(params: &SetupParams, payload: Option<&Payload>) -> Result<Bytes, ProtocolError> {
    let mut fixed = BytesMut::with_capacity(params.encoded_len());
    params.encode_into(&mut fixed)?;

    let flags = if params.lease {
        FrameFlags::new().with_lease()
    } else {
        FrameFlags::new()
    };
    assemble(FrameType::Setup, 0, flags, &fixed, payload)
}

/// Builds a REQUEST_RESPONSE frame.
pub fn request_response_frame(
    stream_id: u32,
    payload: Option<&Payload>,
) -> Result<Bytes, ProtocolError> {
    assemble(
        FrameType::RequestResponse,
        stream_id,
        FrameFlags::new(),
        &[],
        payload,
    )
}

/// Builds a REQUEST_STREAM frame; `initial_n` precedes the payload.
pub fn request_stream_frame(
    stream_id: u32,
    initial_n: u32,
    payload: Option<&Payload>,
) -> Result<Bytes, ProtocolError> {
    assemble(
        FrameType::RequestStream,
        stream_id,
        FrameFlags::new(),
        &initial_n.to_be_bytes(),
        payload,
    )
}

/// Builds a RESPONSE frame, flagged COMPLETE when `is_completed`.
pub fn response_frame(
    stream_id: u32,
    payload: Option<&Payload>,
    is_completed: bool,
) -> Result<Bytes, ProtocolError> {
    let flags = if is_completed {
        FrameFlags::new().with_complete()
    } else {
        FrameFlags::new()
    };
    assemble(FrameType::Response, stream_id, flags, &[], payload)
}

/// Builds an ERROR frame carrying `code` and a UTF-8 message as data.
pub fn error_frame(stream_id: u32, code: ErrorCode, message: &str) -> Result<Bytes, ProtocolError> {
    let payload = if message.is_empty() {
        None
    } else {
        Some(Payload::from_data(Bytes::copy_from_slice(message.as_bytes())))
    };
    assemble(
        FrameType::Error,
        stream_id,
        FrameFlags::new(),
        &code.as_u32().to_be_bytes(),
        payload.as_ref(),
    )
}

/// Builds a CANCEL frame for `stream_id`.
pub fn cancel_frame(stream_id: u32) -> Result<Bytes, ProtocolError> {
    assemble(FrameType::Cancel, stream_id, FrameFlags::new(), &[], None)
}

/// Builds a frame of a type that has no fixed fields (KEEPALIVE, REQUEST_FNF, ...).
///
/// Unknown type codes and types with dedicated builders are rejected with
/// [`ProtocolError::InvalidFrameType`].
pub fn build_frame(
    frame_type: u16,
    stream_id: u32,
    flags: FrameFlags,
    payload: Option<&Payload>,
) -> Result<Bytes, ProtocolError> {
    let kind = FrameType::try_from(frame_type)?;
    if matches!(
        kind,
        FrameType::Setup | FrameType::RequestStream | FrameType::Error
    ) {
        return Err(ProtocolError::InvalidFrameType(frame_type));
    }
    assemble(kind, stream_id, flags, &[], payload)
}

fn assemble(
    frame_type: FrameType,
    stream_id: u32,
    mut flags: FrameFlags,
    fixed: &[u8],
    payload: Option<&Payload>,
) -> Result<Bytes, ProtocolError> {
    let payload_len = payload.map_or(0, Payload::encoded_len);
    let section_len = fixed.len() + payload_len;
    if section_len > MAX_PAYLOAD_SIZE as usize {
        return Err(ProtocolError::FrameTooLarge {
            size: section_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    if payload.is_some_and(Payload::has_metadata) {
        flags = flags.with_metadata();
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + section_len);
    encode_header(
        &mut buf,
        section_len as u32,
        frame_type.as_u16(),
        flags,
        stream_id,
    );
    buf.put_slice(fixed);
    if let Some(payload) = payload {
        payload.encode_into(&mut buf);
    }

    tracing::trace!(
        frame_type = %frame_type,
        stream_id,
        flags = flags.bits(),
        len = buf.len(),
        "built frame"
    );
    Ok(buf.freeze())
}
