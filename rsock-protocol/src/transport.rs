//! Outbound side of a transport connection.
//!
//! Engines never touch sockets directly. They write encoded frames to a
//! [`FrameSink`] and receive inbound bytes as events from whoever drives
//! the transport.

use crate::error::TransportError;
use crate::frame::Frame;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

/// Write half of one physical connection.
pub trait FrameSink: Send {
    /// Queues one complete frame for writing.
    fn write(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Closes the connection and detaches it from the engine.
    fn close(&mut self);
}

#[derive(Debug, Default)]
struct Recorded {
    frames: Vec<Bytes>,
    closed: bool,
    fail_writes: bool,
}

/// In-memory sink that records every written frame.
///
/// Clones share the same record, so a test can keep one clone and hand the
/// other to an engine.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with a broken-pipe error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Returns the raw frames written so far, in write order.
    pub fn written(&self) -> Vec<Bytes> {
        self.inner.lock().frames.clone()
    }

    /// Returns the written frames parsed; frames that fail to parse are skipped.
    pub fn frames(&self) -> Vec<Frame> {
        self.written()
            .into_iter()
            .filter_map(|bytes| Frame::parse(bytes).ok())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn clear(&self) {
        self.inner.lock().frames.clear();
    }
}

impl FrameSink for RecordingSink {
    fn write(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }
        if inner.fail_writes {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "write failed",
            )));
        }
        inner.frames.push(frame);
        Ok(())
    }

    fn close(&mut self) {
        self.inner.lock().closed = true;
    }
}
