//! Response handles given to request handlers.

use crate::error::ServerError;
use bytes::Bytes;
use rsock_protocol::{error_frame, response_frame, ErrorCode, FrameSink, Payload};

/// Writes one RESPONSE frame for `stream_id` to `sink`.
pub fn respond<S: FrameSink>(
    sink: &mut S,
    stream_id: u32,
    payload: Option<&Payload>,
    is_completed: bool,
) -> Result<(), ServerError> {
    let frame = response_frame(stream_id, payload, is_completed)?;
    tracing::debug!(
        "Responding on stream {} ({} bytes, complete={})",
        stream_id,
        frame.len(),
        is_completed
    );
    sink.write(frame).map_err(ServerError::Write)
}

fn write_error<S: FrameSink>(
    sink: &mut S,
    stream_id: u32,
    code: ErrorCode,
    message: &str,
) -> Result<(), ServerError> {
    let frame = error_frame(stream_id, code, message)?;
    sink.write(frame).map_err(ServerError::Write)
}

/// Handle for answering a REQUEST_RESPONSE exactly once.
pub struct SingleResponse<S> {
    stream_id: u32,
    sink: S,
}

impl<S: FrameSink> SingleResponse<S> {
    pub(crate) fn new(stream_id: u32, sink: S) -> Self {
        Self { stream_id, sink }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Sends the response with COMPLETE set.
    pub fn respond(mut self, data: Option<Bytes>, metadata: Option<Bytes>) -> Result<(), ServerError> {
        let payload = Payload { metadata, data };
        respond(&mut self.sink, self.stream_id, Some(&payload), true)
    }

    /// Fails the request with an ERROR frame.
    pub fn error(mut self, code: ErrorCode, message: &str) -> Result<(), ServerError> {
        write_error(&mut self.sink, self.stream_id, code, message)
    }
}

/// Handle for answering a REQUEST_STREAM with any number of frames.
pub struct StreamResponse<S> {
    stream_id: u32,
    initial_n: u32,
    sink: S,
    sent: u64,
    completed: bool,
}

impl<S: FrameSink> StreamResponse<S> {
    pub(crate) fn new(stream_id: u32, initial_n: u32, sink: S) -> Self {
        Self {
            stream_id,
            initial_n,
            sink,
            sent: 0,
            completed: false,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Demand the requester sent with REQUEST_STREAM. Not enforced.
    pub fn initial_n(&self) -> u32 {
        self.initial_n
    }

    /// Number of RESPONSE frames sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Sends one RESPONSE. Once a call completes the stream, later calls fail.
    pub fn respond(
        &mut self,
        is_completed: bool,
        data: Option<Bytes>,
        metadata: Option<Bytes>,
    ) -> Result<(), ServerError> {
        if self.completed {
            return Err(ServerError::DoubleCompletion);
        }

        let payload = Payload { metadata, data };
        let frame = response_frame(self.stream_id, Some(&payload), is_completed)?;
        tracing::debug!(
            "Responding on stream {} ({} bytes, complete={})",
            self.stream_id,
            frame.len(),
            is_completed
        );
        // Terminal once a completing frame is encoded, even if the write fails.
        if is_completed {
            self.completed = true;
        }
        self.sink.write(frame).map_err(ServerError::Write)?;
        self.sent += 1;
        Ok(())
    }

    /// Terminates the stream with an ERROR frame.
    pub fn error(&mut self, code: ErrorCode, message: &str) -> Result<(), ServerError> {
        if self.completed {
            return Err(ServerError::DoubleCompletion);
        }
        let frame = error_frame(self.stream_id, code, message)?;
        self.completed = true;
        self.sink.write(frame).map_err(ServerError::Write)
    }
}
