//! Streaming frame decoder for byte-stream transports.
//!
//! Transports that deliver arbitrary chunks (TCP) feed bytes into a
//! [`FrameDecoder`] and get complete frames back, one at a time.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::header::{Header, HEADER_SIZE};
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Bytes, BytesMut};

/// Splits a byte stream into frames using the header length field.
pub struct FrameDecoder {
    buffer: BytesMut,
    max_payload_size: u32,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }

    /// Sets the largest payload length accepted before the stream is rejected.
    pub fn with_max_payload_size(mut self, max: u32) -> Self {
        self.max_payload_size = max;
        self
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete raw frame, or `Ok(None)` if more data is needed.
    pub fn decode_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = Header::decode(&self.buffer[..HEADER_SIZE])?;
        if header.length > self.max_payload_size {
            return Err(ProtocolError::FrameTooLarge {
                size: header.length as usize,
                max: self.max_payload_size,
            });
        }

        let total_len = HEADER_SIZE + header.length as usize;
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        Ok(Some(self.buffer.split_to(total_len).freeze()))
    }

    /// Returns the next complete parsed frame, or `Ok(None)` if more data is needed.
    pub fn decode(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match self.decode_frame()? {
            Some(bytes) => Frame::parse(bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
