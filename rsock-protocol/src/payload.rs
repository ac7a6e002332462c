//! Variable-length payload section.
//!
//! ```text
//! with METADATA flag:    | metadata_len (u32) | metadata | data |
//! without METADATA flag: | data |
//! ```
//!
//! `metadata_len` counts metadata bytes only. Presence of the metadata
//! section is signalled by the header flag alone.

use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the metadata length prefix.
pub const METADATA_LEN_SIZE: usize = 4;

/// Metadata and data carried by a frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub metadata: Option<Bytes>,
    pub data: Option<Bytes>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a payload with data only.
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            metadata: None,
            data: Some(data.into()),
        }
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Returns whether the METADATA flag must be set for this payload.
    ///
    /// Empty metadata counts as absent so encode and decode stay symmetric.
    pub fn has_metadata(&self) -> bool {
        self.metadata.as_ref().is_some_and(|m| !m.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        !self.has_metadata() && self.data.as_ref().map_or(true, |d| d.is_empty())
    }

    /// Number of bytes [`Payload::encode_into`] will write.
    pub fn encoded_len(&self) -> usize {
        let metadata_len = match &self.metadata {
            Some(m) if !m.is_empty() => METADATA_LEN_SIZE + m.len(),
            _ => 0,
        };
        metadata_len + self.data.as_ref().map_or(0, Bytes::len)
    }

    /// Appends the payload section to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        if let Some(metadata) = self.metadata.as_ref().filter(|m| !m.is_empty()) {
            buf.put_u32(metadata.len() as u32);
            buf.put_slice(metadata);
        }
        if let Some(data) = &self.data {
            buf.put_slice(data);
        }
    }

    /// Decodes a payload section.
    ///
    /// When `has_metadata` is false every byte is data. Empty data decodes as `None`.
    pub fn decode(mut bytes: Bytes, has_metadata: bool) -> Result<Self, ProtocolError> {
        let metadata = if has_metadata {
            if bytes.len() < METADATA_LEN_SIZE {
                return Err(ProtocolError::ShortSection {
                    section: "metadata length",
                    needed: METADATA_LEN_SIZE,
                    available: bytes.len(),
                });
            }
            let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
            let available = bytes.len() - METADATA_LEN_SIZE;
            if available < len {
                return Err(ProtocolError::ShortSection {
                    section: "metadata",
                    needed: len,
                    available,
                });
            }
            let mut section = bytes.split_to(METADATA_LEN_SIZE + len);
            Some(section.split_off(METADATA_LEN_SIZE))
        } else {
            None
        };

        let data = if bytes.is_empty() { None } else { Some(bytes) };

        Ok(Self { metadata, data })
    }
}

/// Encodes an optional payload; absent or empty payloads encode to nothing.
pub fn encode_payload(payload: Option<&Payload>) -> Bytes {
    match payload {
        Some(payload) if !payload.is_empty() => {
            let mut buf = BytesMut::with_capacity(payload.encoded_len());
            payload.encode_into(&mut buf);
            buf.freeze()
        }
        _ => Bytes::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_absent_payload_encodes_empty() {
        assert!(encode_payload(None).is_empty());
        assert!(encode_payload(Some(&Payload::new())).is_empty());
    }

    #[test]
    fn test_data_only_layout() {
        let payload = Payload::from_data("hello");
        let encoded = encode_payload(Some(&payload));
        assert_eq!(&encoded[..], b"hello");
        assert_eq!(encoded.len(), payload.encoded_len());
    }

    #[test]
    fn test_metadata_layout() {
        let payload = Payload::from_data("data").with_metadata("meta");
        let encoded = encode_payload(Some(&payload));
        assert_eq!(&encoded[..], b"\x00\x00\x00\x04metadata");
        assert_eq!(encoded.len(), payload.encoded_len());
    }

    #[test]
    fn test_empty_metadata_is_absent() {
        let payload = Payload::from_data("data").with_metadata("");
        assert!(!payload.has_metadata());
        assert_eq!(&encode_payload(Some(&payload))[..], b"data");
    }

    #[test]
    fn test_metadata_without_data() {
        let payload = Payload::new().with_metadata("only-meta");
        let encoded = encode_payload(Some(&payload));
        let decoded = Payload::decode(encoded, true).unwrap();
        assert_eq!(decoded.metadata.as_deref(), Some(&b"only-meta"[..]));
        assert_eq!(decoded.data, None);
    }

    #[test]
    fn test_decode_without_flag_keeps_everything_as_data() {
        let decoded = Payload::decode(Bytes::from_static(b"\x00\x00\x00\x04meta"), false).unwrap();
        assert_eq!(decoded.metadata, None);
        assert_eq!(decoded.data.as_deref(), Some(&b"\x00\x00\x00\x04meta"[..]));
    }

    #[test]
    fn test_decode_short_metadata_length() {
        let result = Payload::decode(Bytes::from_static(b"\x00\x00"), true);
        assert!(matches!(
            result,
            Err(ProtocolError::ShortSection {
                section: "metadata length",
                ..
            })
        ));
    }

    #[test]
    fn test_decode_metadata_overrun() {
        let result = Payload::decode(Bytes::from_static(b"\x00\x00\x00\x09meta"), true);
        assert!(matches!(
            result,
            Err(ProtocolError::ShortSection {
                section: "metadata",
                needed: 9,
                available: 4
            })
        ));
    }

    proptest! {
        #[test]
        fn prop_payload_roundtrip(
            metadata in proptest::collection::vec(any::<u8>(), 0..64),
            data in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let payload = Payload::new()
                .with_metadata(metadata.clone())
                .with_data(data.clone());
            let encoded = encode_payload(Some(&payload));
            prop_assert_eq!(encoded.len(), payload.encoded_len());

            let decoded = Payload::decode(encoded, payload.has_metadata()).unwrap();
            let expected_metadata = if metadata.is_empty() { None } else { Some(Bytes::from(metadata)) };
            let expected_data = if data.is_empty() { None } else { Some(Bytes::from(data)) };
            prop_assert_eq!(decoded.metadata, expected_metadata);
            prop_assert_eq!(decoded.data, expected_data);
        }
    }
}
