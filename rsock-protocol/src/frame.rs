//! Parsed frames.
//!
//! A frame is a [`Header`] followed by exactly `header.length` payload
//! bytes. Type-specific fixed fields sit at the front of the payload
//! section and are decoded positionally before the generic
//! metadata/data section.

use crate::error::{ErrorCode, ProtocolError};
use crate::header::{FrameType, Header, HEADER_SIZE};
use crate::payload::Payload;
use crate::setup::SetupParams;
use bytes::{Buf, Bytes};

/// Size of a `u32` fixed field (`initial_n`, error code).
const U32_FIELD_SIZE: usize = 4;

/// Type-specific part of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    Setup(SetupParams),
    RequestResponse,
    RequestStream { initial_n: u32 },
    Response,
    Error { code: ErrorCode },
    Cancel,
    /// Known frame type with no fixed fields of its own.
    Other(FrameType),
    /// Type code outside the enumeration; the raw code is in the header.
    Unknown,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub body: FrameBody,
    pub payload: Payload,
}

impl Frame {
    /// Parses one complete frame.
    ///
    /// `bytes` must hold exactly the header plus `header.length` payload bytes.
    pub fn parse(bytes: Bytes) -> Result<Self, ProtocolError> {
        let header = Header::decode(&bytes)?;

        let expected = HEADER_SIZE + header.length as usize;
        if bytes.len() < expected {
            return Err(ProtocolError::Truncated {
                needed: expected,
                actual: bytes.len(),
            });
        }
        if bytes.len() > expected {
            return Err(ProtocolError::LengthMismatch {
                declared: header.length,
                actual: bytes.len() - HEADER_SIZE,
            });
        }

        let mut section = bytes.slice(HEADER_SIZE..);
        let body = match header.kind() {
            Some(FrameType::Setup) => FrameBody::Setup(SetupParams::decode(
                &mut section,
                header.flags.has_lease(),
            )?),
            Some(FrameType::RequestResponse) => FrameBody::RequestResponse,
            Some(FrameType::RequestStream) => FrameBody::RequestStream {
                initial_n: read_u32_field(&mut section, "initial_n")?,
            },
            Some(FrameType::Response) => FrameBody::Response,
            Some(FrameType::Error) => FrameBody::Error {
                code: ErrorCode::from_u32(read_u32_field(&mut section, "error code")?),
            },
            Some(FrameType::Cancel) => FrameBody::Cancel,
            Some(other) => FrameBody::Other(other),
            None => FrameBody::Unknown,
        };

        let payload = Payload::decode(section, header.flags.has_metadata())?;

        Ok(Self {
            header,
            body,
            payload,
        })
    }

    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    /// Returns the frame type, or `None` for unknown type codes.
    pub fn frame_type(&self) -> Option<FrameType> {
        self.header.kind()
    }

    pub fn is_completed(&self) -> bool {
        self.header.flags.is_complete()
    }

    pub fn data(&self) -> Option<&Bytes> {
        self.payload.data.as_ref()
    }

    pub fn metadata(&self) -> Option<&Bytes> {
        self.payload.metadata.as_ref()
    }

    /// Returns the error code and message of an ERROR frame.
    pub fn error(&self) -> Option<(ErrorCode, String)> {
        match self.body {
            FrameBody::Error { code } => {
                let message = self
                    .payload
                    .data
                    .as_ref()
                    .map(|d| String::from_utf8_lossy(d).into_owned())
                    .unwrap_or_default();
                Some((code, message))
            }
            _ => None,
        }
    }

    /// Returns the SETUP parameters of a SETUP frame.
    pub fn setup(&self) -> Option<&SetupParams> {
        match &self.body {
            FrameBody::Setup(params) => Some(params),
            _ => None,
        }
    }
}

/// Parses one complete frame. See [`Frame::parse`].
pub fn parse_frame(bytes: Bytes) -> Result<Frame, ProtocolError> {
    Frame::parse(bytes)
}

/// Returns whether the frame carries the COMPLETE flag.
pub fn is_completed(frame: &Frame) -> bool {
    frame.is_completed()
}

fn read_u32_field(section: &mut Bytes, name: &'static str) -> Result<u32, ProtocolError> {
    if section.len() < U32_FIELD_SIZE {
        return Err(ProtocolError::ShortSection {
            section: name,
            needed: U32_FIELD_SIZE,
            available: section.len(),
        });
    }
    Ok(section.get_u32())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{encode_header, FrameFlags};
    use bytes::{BufMut, BytesMut};

    fn raw_frame(frame_type: u16, flags: FrameFlags, stream_id: u32, section: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        encode_header(&mut buf, section.len() as u32, frame_type, flags, stream_id);
        buf.put_slice(section);
        buf.freeze()
    }

    #[test]
    fn test_parse_request_response() {
        let bytes = raw_frame(0x0004, FrameFlags::new(), 4, b"hello");
        let frame = parse_frame(bytes).unwrap();

        assert_eq!(frame.frame_type(), Some(FrameType::RequestResponse));
        assert_eq!(frame.body, FrameBody::RequestResponse);
        assert_eq!(frame.stream_id(), 4);
        assert_eq!(frame.data().map(|d| &d[..]), Some(&b"hello"[..]));
        assert!(frame.metadata().is_none());
        assert!(!is_completed(&frame));
    }

    #[test]
    fn test_parse_request_stream_initial_n() {
        let bytes = raw_frame(0x0006, FrameFlags::new(), 7, b"\x00\x00\x01\x00body");
        let frame = parse_frame(bytes).unwrap();

        assert_eq!(frame.body, FrameBody::RequestStream { initial_n: 256 });
        assert_eq!(frame.data().map(|d| &d[..]), Some(&b"body"[..]));
    }

    #[test]
    fn test_parse_request_stream_missing_initial_n() {
        let bytes = raw_frame(0x0006, FrameFlags::new(), 7, b"\x00\x01");
        let err = parse_frame(bytes).unwrap_err();
        assert!(err.is_malformed());
        assert!(matches!(
            err,
            ProtocolError::ShortSection {
                section: "initial_n",
                ..
            }
        ));
    }

    #[test]
    fn test_parse_error_frame() {
        let bytes = raw_frame(0x000C, FrameFlags::new(), 3, b"\x00\x00\x02\x01boom");
        let frame = parse_frame(bytes).unwrap();

        assert_eq!(
            frame.error(),
            Some((ErrorCode::ApplicationError, "boom".to_string()))
        );
    }

    #[test]
    fn test_parse_completed_response() {
        let flags = FrameFlags::new().with_complete().with_metadata();
        let bytes = raw_frame(0x000B, flags, 9, b"\x00\x00\x00\x02mddata");
        let frame = parse_frame(bytes).unwrap();

        assert!(is_completed(&frame));
        assert_eq!(frame.metadata().map(|m| &m[..]), Some(&b"md"[..]));
        assert_eq!(frame.data().map(|d| &d[..]), Some(&b"data"[..]));
    }

    #[test]
    fn test_parse_unknown_type_preserved() {
        let bytes = raw_frame(0x0077, FrameFlags::new(), 1, b"opaque");
        let frame = parse_frame(bytes).unwrap();

        assert_eq!(frame.body, FrameBody::Unknown);
        assert_eq!(frame.header.frame_type, 0x0077);
        assert_eq!(frame.frame_type(), None);
        assert_eq!(frame.data().map(|d| &d[..]), Some(&b"opaque"[..]));
    }

    #[test]
    fn test_parse_other_known_type() {
        let bytes = raw_frame(0x0003, FrameFlags::new(), 0, b"");
        let frame = parse_frame(bytes).unwrap();
        assert_eq!(frame.body, FrameBody::Other(FrameType::KeepAlive));
        assert_eq!(frame.payload, Payload::new());
    }

    #[test]
    fn test_parse_truncated_payload() {
        let mut bytes = BytesMut::from(&raw_frame(0x0004, FrameFlags::new(), 1, b"hello")[..]);
        bytes.truncate(HEADER_SIZE + 2);
        let err = parse_frame(bytes.freeze()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                needed: 17,
                actual: 14
            }
        ));
    }

    #[test]
    fn test_parse_trailing_bytes_rejected() {
        let mut bytes = BytesMut::from(&raw_frame(0x0004, FrameFlags::new(), 1, b"hello")[..]);
        bytes.put_slice(b"extra");
        let err = parse_frame(bytes.freeze()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::LengthMismatch {
                declared: 5,
                actual: 10
            }
        ));
    }

    #[test]
    fn test_parse_metadata_flag_with_bad_section() {
        let flags = FrameFlags::new().with_metadata();
        let bytes = raw_frame(0x000B, flags, 1, b"\x00\x00\x00\x50x");
        assert!(parse_frame(bytes).unwrap_err().is_malformed());
    }

    #[test]
    fn test_parse_short_header() {
        let err = parse_frame(Bytes::from_static(b"\x00\x00")).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }
}
