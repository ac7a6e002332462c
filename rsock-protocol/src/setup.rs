//! SETUP frame parameters.
//!
//! SETUP payload section:
//!
//! ```text
//! | version (u32) | keep_alive_ms (u32) | max_lifetime_ms (u32) |
//! | mime_len (u8) | metadata MIME type | mime_len (u8) | data MIME type |
//! | [metadata_len (u32) | metadata] | data |
//! ```
//!
//! A SETUP frame whose payload ends after the three fixed integers is
//! accepted and decodes with empty MIME types.

use crate::error::ProtocolError;
use crate::PROTOCOL_VERSION;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;

/// Size of the fixed SETUP fields (version, keep-alive, max lifetime).
pub const SETUP_FIXED_SIZE: usize = 12;

/// Default interval between KEEPALIVE frames.
pub const DEFAULT_KEEP_ALIVE_MS: u32 = 10_000;

/// Default maximum time without a KEEPALIVE before the peer is considered dead.
pub const DEFAULT_MAX_LIFETIME_MS: u32 = 100_000;

/// Default MIME type for both metadata and data.
pub const DEFAULT_MIME_TYPE: &str = "UTF-8";

/// Connection-level parameters sent in the SETUP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupParams {
    pub version: u32,
    /// Milliseconds between KEEPALIVE frames.
    pub keep_alive_interval: u32,
    /// Milliseconds without KEEPALIVE before the connection is dead.
    pub max_lifetime: u32,
    pub metadata_mime_type: String,
    pub data_mime_type: String,
    /// Sets the LEASE flag. Lease semantics are not implemented.
    pub lease: bool,
}

impl Default for SetupParams {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_MS,
            max_lifetime: DEFAULT_MAX_LIFETIME_MS,
            metadata_mime_type: DEFAULT_MIME_TYPE.to_string(),
            data_mime_type: DEFAULT_MIME_TYPE.to_string(),
            lease: false,
        }
    }
}

impl SetupParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = duration_to_millis(interval);
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = duration_to_millis(lifetime);
        self
    }

    pub fn with_mime_types(
        mut self,
        metadata_mime_type: impl Into<String>,
        data_mime_type: impl Into<String>,
    ) -> Self {
        self.metadata_mime_type = metadata_mime_type.into();
        self.data_mime_type = data_mime_type.into();
        self
    }

    pub fn with_lease(mut self) -> Self {
        self.lease = true;
        self
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(u64::from(self.keep_alive_interval))
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(u64::from(self.max_lifetime))
    }

    /// Number of bytes [`SetupParams::encode_into`] will write.
    pub fn encoded_len(&self) -> usize {
        SETUP_FIXED_SIZE + 2 + self.metadata_mime_type.len() + self.data_mime_type.len()
    }

    /// Appends the SETUP fixed fields and MIME types to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        check_mime_len(&self.metadata_mime_type)?;
        check_mime_len(&self.data_mime_type)?;

        buf.reserve(self.encoded_len());
        buf.put_u32(self.version);
        buf.put_u32(self.keep_alive_interval);
        buf.put_u32(self.max_lifetime);
        buf.put_u8(self.metadata_mime_type.len() as u8);
        buf.put_slice(self.metadata_mime_type.as_bytes());
        buf.put_u8(self.data_mime_type.len() as u8);
        buf.put_slice(self.data_mime_type.as_bytes());
        Ok(())
    }

    /// Decodes the SETUP fields from the front of `buf`, leaving the generic payload.
    pub fn decode(buf: &mut Bytes, lease: bool) -> Result<Self, ProtocolError> {
        if buf.len() < SETUP_FIXED_SIZE {
            return Err(ProtocolError::ShortSection {
                section: "setup fields",
                needed: SETUP_FIXED_SIZE,
                available: buf.len(),
            });
        }

        let version = buf.get_u32();
        let keep_alive_interval = buf.get_u32();
        let max_lifetime = buf.get_u32();

        let (metadata_mime_type, data_mime_type) = if buf.is_empty() {
            (String::new(), String::new())
        } else {
            let metadata = decode_mime(buf, "metadata MIME type")?;
            let data = decode_mime(buf, "data MIME type")?;
            (metadata, data)
        };

        Ok(Self {
            version,
            keep_alive_interval,
            max_lifetime,
            metadata_mime_type,
            data_mime_type,
            lease,
        })
    }
}

fn duration_to_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

fn check_mime_len(mime: &str) -> Result<(), ProtocolError> {
    if mime.len() > u8::MAX as usize {
        return Err(ProtocolError::MimeTypeTooLong(mime.len()));
    }
    Ok(())
}

fn decode_mime(buf: &mut Bytes, section: &'static str) -> Result<String, ProtocolError> {
    if buf.is_empty() {
        return Err(ProtocolError::ShortSection {
            section,
            needed: 1,
            available: 0,
        });
    }
    let len = buf.get_u8() as usize;
    if buf.len() < len {
        return Err(ProtocolError::ShortSection {
            section,
            needed: len,
            available: buf.len(),
        });
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(section))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = SetupParams::default();
        assert_eq!(params.version, PROTOCOL_VERSION);
        assert_eq!(params.keep_alive(), Duration::from_secs(10));
        assert_eq!(params.max_lifetime(), Duration::from_secs(100));
        assert_eq!(params.metadata_mime_type, "UTF-8");
        assert_eq!(params.data_mime_type, "UTF-8");
        assert!(!params.lease);
    }

    #[test]
    fn test_fields_roundtrip() {
        let params = SetupParams::new()
            .with_keep_alive(Duration::from_millis(1023))
            .with_max_lifetime(Duration::from_millis(4095))
            .with_mime_types("application/json", "text/plain");

        let mut buf = BytesMut::new();
        params.encode_into(&mut buf).unwrap();
        assert_eq!(buf.len(), params.encoded_len());

        let mut bytes = buf.freeze();
        let decoded = SetupParams::decode(&mut bytes, false).unwrap();
        assert_eq!(decoded, params);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_blank_setup_fields() {
        // version, 1023ms keep-alive, 4095ms max lifetime, no MIME types
        let mut bytes = Bytes::from_static(&[
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xFF, 0x00, 0x00, 0x0F, 0xFF,
        ]);
        let decoded = SetupParams::decode(&mut bytes, false).unwrap();
        assert_eq!(decoded.keep_alive_interval, 1023);
        assert_eq!(decoded.max_lifetime, 4095);
        assert!(decoded.metadata_mime_type.is_empty());
        assert!(decoded.data_mime_type.is_empty());
    }

    #[test]
    fn test_mime_too_long() {
        let params = SetupParams::new().with_mime_types("x".repeat(256), "UTF-8");
        let mut buf = BytesMut::new();
        assert!(matches!(
            params.encode_into(&mut buf),
            Err(ProtocolError::MimeTypeTooLong(256))
        ));
    }

    #[test]
    fn test_truncated_mime() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u32(1);
        buf.put_u32(2);
        buf.put_u8(10);
        buf.put_slice(b"abc");
        let mut bytes = buf.freeze();
        assert!(matches!(
            SetupParams::decode(&mut bytes, false),
            Err(ProtocolError::ShortSection {
                section: "metadata MIME type",
                ..
            })
        ));
    }

    #[test]
    fn test_oversized_duration_saturates() {
        let params = SetupParams::new().with_keep_alive(Duration::from_secs(u64::MAX / 1000));
        assert_eq!(params.keep_alive_interval, u32::MAX);
    }
}
