//! Protocol error types and wire error codes.

use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated frame: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("frame length mismatch: header declares {declared} payload bytes, found {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("malformed {section}: need {needed} bytes, {available} available")]
    ShortSection {
        section: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("invalid frame type: {0:#06x}")]
    InvalidFrameType(u16),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: u32 },

    #[error("MIME type too long: {0} bytes (max 255)")]
    MimeTypeTooLong(usize),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}

impl ProtocolError {
    /// Returns whether this error means the inbound bytes are not a valid frame.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::Truncated { .. }
                | ProtocolError::LengthMismatch { .. }
                | ProtocolError::ShortSection { .. }
                | ProtocolError::InvalidUtf8(_)
        )
    }
}

/// Errors reported by a transport sink.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error codes carried by ERROR frames.
///
/// Codes outside the known set are preserved in [`ErrorCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Connection setup
    InvalidSetup,
    UnsupportedSetup,
    RejectedSetup,

    // Connection
    ConnectionError,

    // Stream
    ApplicationError,
    Rejected,
    Canceled,
    Invalid,

    Other(u32),
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0001 => ErrorCode::InvalidSetup,
            0x0002 => ErrorCode::UnsupportedSetup,
            0x0003 => ErrorCode::RejectedSetup,
            0x0101 => ErrorCode::ConnectionError,
            0x0201 => ErrorCode::ApplicationError,
            0x0202 => ErrorCode::Rejected,
            0x0203 => ErrorCode::Canceled,
            0x0204 => ErrorCode::Invalid,
            other => ErrorCode::Other(other),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            ErrorCode::InvalidSetup => 0x0001,
            ErrorCode::UnsupportedSetup => 0x0002,
            ErrorCode::RejectedSetup => 0x0003,
            ErrorCode::ConnectionError => 0x0101,
            ErrorCode::ApplicationError => 0x0201,
            ErrorCode::Rejected => 0x0202,
            ErrorCode::Canceled => 0x0203,
            ErrorCode::Invalid => 0x0204,
            ErrorCode::Other(code) => *code,
        }
    }

    /// Returns whether this code terminates the whole connection rather than one stream.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidSetup
                | ErrorCode::UnsupportedSetup
                | ErrorCode::RejectedSetup
                | ErrorCode::ConnectionError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::InvalidSetup => write!(f, "INVALID_SETUP"),
            ErrorCode::UnsupportedSetup => write!(f, "UNSUPPORTED_SETUP"),
            ErrorCode::RejectedSetup => write!(f, "REJECTED_SETUP"),
            ErrorCode::ConnectionError => write!(f, "CONNECTION_ERROR"),
            ErrorCode::ApplicationError => write!(f, "APPLICATION_ERROR"),
            ErrorCode::Rejected => write!(f, "REJECTED"),
            ErrorCode::Canceled => write!(f, "CANCELED"),
            ErrorCode::Invalid => write!(f, "INVALID"),
            ErrorCode::Other(code) => write!(f, "UNKNOWN({code:#x})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_values() {
        for code in [
            ErrorCode::InvalidSetup,
            ErrorCode::UnsupportedSetup,
            ErrorCode::RejectedSetup,
            ErrorCode::ConnectionError,
            ErrorCode::ApplicationError,
            ErrorCode::Rejected,
            ErrorCode::Canceled,
            ErrorCode::Invalid,
        ] {
            assert_eq!(ErrorCode::from_u32(code.as_u32()), code);
        }

        assert_eq!(ErrorCode::ApplicationError.as_u32(), 0x0201);
        assert_eq!(ErrorCode::from_u32(0x9999), ErrorCode::Other(0x9999));
        assert_eq!(ErrorCode::Other(0x9999).as_u32(), 0x9999);
    }

    #[test]
    fn test_error_code_connection_level() {
        assert!(ErrorCode::InvalidSetup.is_connection_level());
        assert!(ErrorCode::ConnectionError.is_connection_level());
        assert!(!ErrorCode::ApplicationError.is_connection_level());
        assert!(!ErrorCode::Canceled.is_connection_level());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(format!("{}", ErrorCode::InvalidSetup), "INVALID_SETUP");
        assert_eq!(format!("{}", ErrorCode::ApplicationError), "APPLICATION_ERROR");
        assert_eq!(format!("{}", ErrorCode::Other(0x42)), "UNKNOWN(0x42)");
    }

    #[test]
    fn test_malformed_classification() {
        assert!(ProtocolError::Truncated { needed: 12, actual: 3 }.is_malformed());
        assert!(ProtocolError::LengthMismatch { declared: 4, actual: 2 }.is_malformed());
        assert!(ProtocolError::ShortSection {
            section: "metadata",
            needed: 8,
            available: 2
        }
        .is_malformed());
        assert!(!ProtocolError::InvalidFrameType(0x77).is_malformed());
        assert!(!ProtocolError::MimeTypeTooLong(300).is_malformed());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidFrameType(0x77);
        assert!(err.to_string().contains("0x0077"));

        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::LengthMismatch {
            declared: 26,
            actual: 20,
        };
        let msg = err.to_string();
        assert!(msg.contains("26") && msg.contains("20"));

        let err = ProtocolError::InvalidUtf8("error message");
        assert!(err.to_string().contains("UTF-8"));
    }
}
