//! Client connection engine.
//!
//! [`Connection`] is a synchronous state machine. It owns the stream id
//! counter, the pending-request table and the queue of requests made before
//! the transport was ready. Whoever drives it feeds [`ClientEvent`]s into
//! [`Connection::handle_event`] and calls [`Connection::expire_pending`]
//! when [`Connection::next_deadline`] passes.

use crate::error::ClientError;
use crate::transport::{ClientEvent, ClientTransport};
use bytes::Bytes;
use rsock_protocol::{
    cancel_frame, request_response_frame, request_stream_frame, setup_frame, Diagnostic,
    DiagnosticHook, DiagnosticKind, FrameSink, Frame, Payload, SetupParams, TransportError,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Default REQUEST_STREAM demand.
pub const DEFAULT_INITIAL_N: u32 = 256;

/// Callback invoked for every frame (or failure) on one request.
pub type ResponseCallback = Box<dyn FnMut(Result<Frame, ClientError>) + Send>;

/// Callback told the stream id once a request is written, or `None` if it failed first.
pub type SentCallback = Box<dyn FnOnce(Option<u32>) + Send>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Parameters written in the SETUP frame.
    pub setup: SetupParams,
    /// Payload carried by the SETUP frame.
    pub setup_payload: Option<Payload>,
    /// Demand sent with `request_stream`.
    pub initial_n: u32,
    /// Deadline attached to each request. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            setup: SetupParams::default(),
            setup_payload: None,
            initial_n: DEFAULT_INITIAL_N,
            request_timeout: None,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.setup = self.setup.with_keep_alive(interval);
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.setup = self.setup.with_max_lifetime(lifetime);
        self
    }

    pub fn with_mime_types(
        mut self,
        metadata_mime_type: impl Into<String>,
        data_mime_type: impl Into<String>,
    ) -> Self {
        self.setup = self.setup.with_mime_types(metadata_mime_type, data_mime_type);
        self
    }

    pub fn with_setup_payload(mut self, payload: Payload) -> Self {
        self.setup_payload = Some(payload);
        self
    }

    pub fn with_initial_n(mut self, initial_n: u32) -> Self {
        self.initial_n = initial_n;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Lifecycle of a client engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Closed,
}

/// Which request method a call goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Response,
    Stream { initial_n: u32 },
}

struct PendingRequest {
    callback: ResponseCallback,
    deadline: Option<Instant>,
}

struct QueuedRequest {
    kind: RequestKind,
    payload: Payload,
    callback: ResponseCallback,
    on_sent: Option<SentCallback>,
}

/// A client connection engine over transport `T`.
pub struct Connection<T: ClientTransport> {
    config: ConnectionConfig,
    transport: Option<T>,
    stream: Option<T::Stream>,
    state: ConnectionState,
    pending: HashMap<u32, PendingRequest>,
    deadlines: BTreeSet<(Instant, u32)>,
    queue: VecDeque<QueuedRequest>,
    /// Next stream id. Kept wider than u32 so exhaustion is detectable.
    next_stream_id: u64,
    diagnostics: Option<DiagnosticHook>,
}

impl<T: ClientTransport> Connection<T> {
    /// Creates a new engine (not yet connected).
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        Self {
            config,
            transport: Some(transport),
            stream: None,
            state: ConnectionState::Disconnected,
            pending: HashMap::new(),
            deadlines: BTreeSet::new(),
            queue: VecDeque::new(),
            next_stream_id: 1,
            diagnostics: None,
        }
    }

    /// Installs a hook that observes dropped inbound frames.
    pub fn set_diagnostic_hook(&mut self, hook: DiagnosticHook) {
        self.diagnostics = Some(hook);
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Returns the number of registered (in-flight) requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns the number of requests waiting for a connection.
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Asks the transport to connect. Idempotent while connecting or ready.
    pub fn establish_connection(&mut self) -> Result<(), ClientError> {
        match self.state {
            ConnectionState::Closed => Err(ClientError::Closed),
            ConnectionState::Connecting | ConnectionState::Ready => Ok(()),
            ConnectionState::Disconnected => {
                let transport = self.transport.as_mut().ok_or(ClientError::Closed)?;
                tracing::debug!("Establishing connection");
                self.state = ConnectionState::Connecting;
                transport.establish_connection();
                Ok(())
            }
        }
    }

    /// Sends a REQUEST_RESPONSE.
    ///
    /// Returns the stream id when the frame was written, or `None` when the
    /// request was queued or failed (the callback reports failures).
    pub fn request_response(&mut self, payload: Payload, callback: ResponseCallback) -> Option<u32> {
        self.request(RequestKind::Response, payload, callback)
    }

    /// Sends a REQUEST_STREAM with the configured initial demand.
    pub fn request_stream(&mut self, payload: Payload, callback: ResponseCallback) -> Option<u32> {
        let initial_n = self.config.initial_n;
        self.request(RequestKind::Stream { initial_n }, payload, callback)
    }

    /// Sends a REQUEST_STREAM with an explicit initial demand.
    pub fn request_stream_with(
        &mut self,
        payload: Payload,
        initial_n: u32,
        callback: ResponseCallback,
    ) -> Option<u32> {
        self.request(RequestKind::Stream { initial_n }, payload, callback)
    }

    /// Sends a request of the given kind, or queues it until the connection is ready.
    pub fn request(
        &mut self,
        kind: RequestKind,
        payload: Payload,
        mut callback: ResponseCallback,
    ) -> Option<u32> {
        match self.state {
            ConnectionState::Closed => {
                callback(Err(ClientError::Closed));
                None
            }
            ConnectionState::Ready => self.send_request(kind, payload, callback),
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                self.enqueue(kind, payload, callback, None);
                None
            }
        }
    }

    /// Like [`Connection::request`], but reports the stream id to `on_sent`
    /// once the frame is written. A queued request reports after the queue
    /// drains. `on_sent` gets `None` if the request fails before being written
    /// and is dropped uncalled if the engine closes first.
    pub fn submit(
        &mut self,
        kind: RequestKind,
        payload: Payload,
        callback: ResponseCallback,
        on_sent: SentCallback,
    ) {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                self.enqueue(kind, payload, callback, Some(on_sent));
            }
            ConnectionState::Ready | ConnectionState::Closed => {
                let stream_id = self.request(kind, payload, callback);
                on_sent(stream_id);
            }
        }
    }

    fn enqueue(
        &mut self,
        kind: RequestKind,
        payload: Payload,
        callback: ResponseCallback,
        on_sent: Option<SentCallback>,
    ) {
        tracing::debug!("Queueing {:?} request until connected", kind);
        self.queue.push_back(QueuedRequest {
            kind,
            payload,
            callback,
            on_sent,
        });
        if let Err(e) = self.establish_connection() {
            tracing::warn!("Failed to start connection: {}", e);
        }
    }

    fn send_request(
        &mut self,
        kind: RequestKind,
        payload: Payload,
        mut callback: ResponseCallback,
    ) -> Option<u32> {
        let stream_id = match self.allocate_stream_id() {
            Ok(id) => id,
            Err(e) => {
                callback(Err(e));
                return None;
            }
        };

        let encoded = match kind {
            RequestKind::Response => request_response_frame(stream_id, Some(&payload)),
            RequestKind::Stream { initial_n } => {
                request_stream_frame(stream_id, initial_n, Some(&payload))
            }
        };
        let frame = match encoded {
            Ok(frame) => frame,
            Err(e) => {
                callback(Err(e.into()));
                return None;
            }
        };

        let deadline = self.config.request_timeout.map(|t| Instant::now() + t);
        if let Some(deadline) = deadline {
            self.deadlines.insert((deadline, stream_id));
        }
        self.pending
            .insert(stream_id, PendingRequest { callback, deadline });

        if let Err(e) = self.write(frame) {
            tracing::warn!("Write failed for stream {}: {}", stream_id, e);
            if let Some(mut request) = self.deregister(stream_id) {
                (request.callback)(Err(ClientError::Write(e)));
            }
            return None;
        }

        tracing::debug!("Sent {:?} on stream {}", kind, stream_id);
        Some(stream_id)
    }

    /// Stops tracking a stream and tells the server to stop producing.
    ///
    /// Returns false if the stream was not pending. The callback is dropped
    /// without being invoked.
    pub fn cancel(&mut self, stream_id: u32) -> bool {
        if self.deregister(stream_id).is_none() {
            return false;
        }

        match cancel_frame(stream_id) {
            Ok(frame) => {
                if let Err(e) = self.write(frame) {
                    tracing::warn!("Failed to write CANCEL for stream {}: {}", stream_id, e);
                }
            }
            Err(e) => tracing::warn!("Failed to build CANCEL for stream {}: {}", stream_id, e),
        }
        true
    }

    /// Feeds one transport event into the engine.
    pub fn handle_event(&mut self, event: ClientEvent<T::Stream>) {
        match event {
            ClientEvent::Connected(stream) => self.on_connected(stream),
            ClientEvent::Data(bytes) => self.on_data(bytes),
            ClientEvent::Error(err) => self.on_transport_error(err),
            ClientEvent::Closed => self.on_closed(),
        }
    }

    fn on_connected(&mut self, mut stream: T::Stream) {
        if self.state == ConnectionState::Closed {
            stream.close();
            return;
        }

        if let Some(mut old) = self.stream.replace(stream) {
            tracing::info!("Replacing active connection");
            old.close();
        }

        match setup_frame(&self.config.setup, self.config.setup_payload.as_ref()) {
            Ok(frame) => {
                if let Err(e) = self.write(frame) {
                    tracing::warn!("Failed to write SETUP: {}", e);
                    self.report(Diagnostic::new(DiagnosticKind::SetupWriteFailed).with_detail(e.to_string()));
                }
            }
            Err(e) => {
                tracing::warn!("Failed to build SETUP: {}", e);
                self.report(Diagnostic::new(DiagnosticKind::SetupWriteFailed).with_detail(e.to_string()));
            }
        }

        self.state = ConnectionState::Ready;
        tracing::info!("Connection ready, draining {} queued requests", self.queue.len());

        let queued = std::mem::take(&mut self.queue);
        for request in queued {
            match request.on_sent {
                Some(on_sent) => {
                    self.submit(request.kind, request.payload, request.callback, on_sent)
                }
                None => {
                    self.request(request.kind, request.payload, request.callback);
                }
            }
        }
    }

    fn on_data(&mut self, bytes: Bytes) {
        let frame = match Frame::parse(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Dropping malformed frame: {}", e);
                self.report(Diagnostic::new(DiagnosticKind::MalformedFrame).with_detail(e.to_string()));
                return;
            }
        };

        let stream_id = frame.stream_id();
        if !self.pending.contains_key(&stream_id) {
            tracing::debug!("Dropping frame for unknown stream {}", stream_id);
            self.report(Diagnostic::new(DiagnosticKind::UnmatchedStream).with_stream(stream_id));
            return;
        }

        if let Some((code, message)) = frame.error() {
            tracing::debug!("Stream {} failed: {} - {}", stream_id, code, message);
            if let Some(mut request) = self.deregister(stream_id) {
                (request.callback)(Err(ClientError::Remote { code, message }));
            }
            return;
        }

        if frame.is_completed() {
            if let Some(mut request) = self.deregister(stream_id) {
                (request.callback)(Ok(frame));
            }
        } else if let Some(request) = self.pending.get_mut(&stream_id) {
            (request.callback)(Ok(frame));
        }
    }

    fn on_transport_error(&mut self, err: TransportError) {
        tracing::warn!("Transport error: {}", err);

        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Disconnected;
            let message = err.to_string();
            for mut request in std::mem::take(&mut self.queue) {
                (request.callback)(Err(ClientError::Transport(message.clone())));
                if let Some(on_sent) = request.on_sent {
                    on_sent(None);
                }
            }
        }
    }

    fn on_closed(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Ready | ConnectionState::Connecting
        ) {
            tracing::info!("Connection closed by peer");
            self.stream = None;
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Fails every request whose deadline is at or before `now`.
    ///
    /// Returns the number of requests that expired.
    pub fn expire_pending(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        while let Some(&(deadline, stream_id)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.remove(&(deadline, stream_id));
            if let Some(mut request) = self.pending.remove(&stream_id) {
                tracing::debug!("Stream {} timed out", stream_id);
                (request.callback)(Err(ClientError::Timeout { stream_id }));
                expired += 1;
            }
        }
        expired
    }

    /// Returns the earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|&(deadline, _)| deadline)
    }

    /// Closes the active connection and the transport.
    ///
    /// Outstanding and queued callbacks are dropped without being invoked.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        tracing::debug!("Closing connection...");

        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.destroy();
        }

        tracing::debug!(
            "Clearing {} pending and {} queued requests",
            self.pending.len(),
            self.queue.len()
        );
        self.pending.clear();
        self.deadlines.clear();
        self.queue.clear();
        self.state = ConnectionState::Closed;
    }

    fn allocate_stream_id(&mut self) -> Result<u32, ClientError> {
        let id = u32::try_from(self.next_stream_id).map_err(|_| ClientError::StreamIdsExhausted)?;
        self.next_stream_id += 1;
        Ok(id)
    }

    fn deregister(&mut self, stream_id: u32) -> Option<PendingRequest> {
        let request = self.pending.remove(&stream_id)?;
        if let Some(deadline) = request.deadline {
            self.deadlines.remove(&(deadline, stream_id));
        }
        Some(request)
    }

    fn write(&mut self, frame: Bytes) -> Result<(), TransportError> {
        match self.stream.as_mut() {
            Some(stream) => stream.write(frame),
            None => Err(TransportError::Closed),
        }
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        if let Some(hook) = self.diagnostics.as_mut() {
            hook(&diagnostic);
        }
    }
}
