//! Fixed-size frame header.
//!
//! Header layout (12 bytes, big-endian):
//!
//! ```text
//! +-------------+--------+--------+-------------+
//! | length      | type   | flags  | stream_id   |
//! | 4 bytes     | 2 bytes| 2 bytes| 4 bytes     |
//! +-------------+--------+--------+-------------+
//! | payload (length bytes)                      |
//! +---------------------------------------------+
//! ```
//!
//! `length` counts payload bytes only; the header itself is excluded.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Size of the fixed frame header in bytes (4+2+2+4 = 12).
pub const HEADER_SIZE: usize = 12;

/// Frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameType {
    Setup = 0x0001,
    Lease = 0x0002,
    KeepAlive = 0x0003,
    RequestResponse = 0x0004,
    RequestFnf = 0x0005,
    RequestStream = 0x0006,
    RequestSub = 0x0007,
    RequestChannel = 0x0008,
    RequestN = 0x0009,
    Cancel = 0x000A,
    Response = 0x000B,
    Error = 0x000C,
    MetadataPush = 0x000D,
    Ext = 0xFFFF,
}

impl FrameType {
    /// Every frame type, in wire-code order.
    pub const ALL: [FrameType; 14] = [
        FrameType::Setup,
        FrameType::Lease,
        FrameType::KeepAlive,
        FrameType::RequestResponse,
        FrameType::RequestFnf,
        FrameType::RequestStream,
        FrameType::RequestSub,
        FrameType::RequestChannel,
        FrameType::RequestN,
        FrameType::Cancel,
        FrameType::Response,
        FrameType::Error,
        FrameType::MetadataPush,
        FrameType::Ext,
    ];

    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0x0001 => Some(FrameType::Setup),
            0x0002 => Some(FrameType::Lease),
            0x0003 => Some(FrameType::KeepAlive),
            0x0004 => Some(FrameType::RequestResponse),
            0x0005 => Some(FrameType::RequestFnf),
            0x0006 => Some(FrameType::RequestStream),
            0x0007 => Some(FrameType::RequestSub),
            0x0008 => Some(FrameType::RequestChannel),
            0x0009 => Some(FrameType::RequestN),
            0x000A => Some(FrameType::Cancel),
            0x000B => Some(FrameType::Response),
            0x000C => Some(FrameType::Error),
            0x000D => Some(FrameType::MetadataPush),
            0xFFFF => Some(FrameType::Ext),
            _ => None,
        }
    }

    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl From<FrameType> for u16 {
    fn from(frame_type: FrameType) -> Self {
        frame_type.as_u16()
    }
}

impl TryFrom<u16> for FrameType {
    type Error = ProtocolError;

    fn try_from(code: u16) -> Result<Self, ProtocolError> {
        FrameType::from_u16(code).ok_or(ProtocolError::InvalidFrameType(code))
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::Setup => "SETUP",
            FrameType::Lease => "LEASE",
            FrameType::KeepAlive => "KEEPALIVE",
            FrameType::RequestResponse => "REQUEST_RESPONSE",
            FrameType::RequestFnf => "REQUEST_FNF",
            FrameType::RequestStream => "REQUEST_STREAM",
            FrameType::RequestSub => "REQUEST_SUB",
            FrameType::RequestChannel => "REQUEST_CHANNEL",
            FrameType::RequestN => "REQUEST_N",
            FrameType::Cancel => "CANCEL",
            FrameType::Response => "RESPONSE",
            FrameType::Error => "ERROR",
            FrameType::MetadataPush => "METADATA_PUSH",
            FrameType::Ext => "EXT",
        };
        f.write_str(name)
    }
}

/// Returns whether `code` is a member of the frame type enumeration.
pub fn is_valid_frame_type(code: u16) -> bool {
    FrameType::from_u16(code).is_some()
}

/// Frame flags bitfield.
///
/// Unknown bits are carried through unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FrameFlags(u16);

impl FrameFlags {
    pub const NONE: u16 = 0;
    /// Frame may be ignored if not understood.
    pub const IGNORE: u16 = 1 << 15;
    /// Payload carries a metadata section.
    pub const METADATA: u16 = 1 << 14;
    /// Requester will honor leases (SETUP only, reserved).
    pub const LEASE: u16 = 1 << 13;
    /// Terminal frame of its stream.
    pub const COMPLETE: u16 = 1 << 12;

    pub fn new() -> Self {
        Self(Self::NONE)
    }

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn with_metadata(mut self) -> Self {
        self.0 |= Self::METADATA;
        self
    }

    pub fn with_complete(mut self) -> Self {
        self.0 |= Self::COMPLETE;
        self
    }

    pub fn with_lease(mut self) -> Self {
        self.0 |= Self::LEASE;
        self
    }

    pub fn with_ignore(mut self) -> Self {
        self.0 |= Self::IGNORE;
        self
    }

    pub fn has_metadata(&self) -> bool {
        self.0 & Self::METADATA != 0
    }

    pub fn is_complete(&self) -> bool {
        self.0 & Self::COMPLETE != 0
    }

    pub fn has_lease(&self) -> bool {
        self.0 & Self::LEASE != 0
    }

    pub fn can_ignore(&self) -> bool {
        self.0 & Self::IGNORE != 0
    }

    pub fn bits(&self) -> u16 {
        self.0
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Payload length in bytes (header excluded).
    pub length: u32,
    /// Raw frame type code; may be outside the known enumeration.
    pub frame_type: u16,
    /// Frame flags.
    pub flags: FrameFlags,
    /// Stream identifier, 0 for connection-level frames.
    pub stream_id: u32,
}

impl Header {
    /// Returns the frame type, or `None` for codes outside the enumeration.
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u16(self.frame_type)
    }

    /// Appends the encoded header to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_header(buf, self.length, self.frame_type, self.flags, self.stream_id);
    }

    /// Decodes a header from the first [`HEADER_SIZE`] bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            length: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            frame_type: u16::from_be_bytes([bytes[4], bytes[5]]),
            flags: FrameFlags::from_bits(u16::from_be_bytes([bytes[6], bytes[7]])),
            stream_id: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}

/// Writes the four header fields at their fixed offsets.
pub fn encode_header(
    buf: &mut BytesMut,
    payload_len: u32,
    frame_type: u16,
    flags: FrameFlags,
    stream_id: u32,
) {
    buf.reserve(HEADER_SIZE);
    buf.put_u32(payload_len);
    buf.put_u16(frame_type);
    buf.put_u16(flags.bits());
    buf.put_u32(stream_id);
}
