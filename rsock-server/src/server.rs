//! Server engine.
//!
//! [`Server`] tracks one [`Session`] per accepted connection, enforces the
//! SETUP handshake and dispatches request frames to registered handlers.
//! It performs no I/O of its own: events come in through
//! [`Server::handle_event`] and frames go out through each session's sink.

use crate::error::ServerError;
use crate::handler::{Handler, HandlerRegistry};
use crate::response::{SingleResponse, StreamResponse};
use crate::session::Session;
use crate::transport::{ServerEvent, ServerTransport};
use bytes::Bytes;
use rsock_protocol::{
    Diagnostic, DiagnosticHook, DiagnosticKind, Frame, FrameBody, FrameSink, FrameType,
};
use std::collections::HashMap;

/// Server statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connections_total: u64,
    pub connections_active: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
}

/// Callback run once the server has closed.
pub type CloseCallback = Box<dyn FnOnce() + Send>;

/// A server engine over transport `T`.
pub struct Server<T: ServerTransport> {
    transport: Option<T>,
    sessions: HashMap<u64, Session<T::Stream>>,
    registry: HandlerRegistry<T::Stream>,
    stats: ServerStats,
    diagnostics: Option<DiagnosticHook>,
    closed: bool,
}

impl<T: ServerTransport> Server<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Some(transport),
            sessions: HashMap::new(),
            registry: HandlerRegistry::new(),
            stats: ServerStats::default(),
            diagnostics: None,
            closed: false,
        }
    }

    /// Installs a hook that observes dropped inbound frames.
    pub fn set_diagnostic_hook(&mut self, hook: DiagnosticHook) {
        self.diagnostics = Some(hook);
    }

    /// Asks the transport to start accepting connections.
    pub fn listen(&mut self) -> Result<(), ServerError> {
        if self.closed {
            return Err(ServerError::Closed);
        }
        let transport = self.transport.as_mut().ok_or(ServerError::Closed)?;
        transport.establish_connection();
        Ok(())
    }

    /// Registers a handler for the frame type with wire code `code`.
    pub fn on(&mut self, code: u16, handler: Handler<T::Stream>) -> Result<(), ServerError> {
        if self.closed {
            return Err(ServerError::Closed);
        }
        self.registry.register(code, handler)
    }

    pub fn on_request_response<F>(&mut self, f: F) -> Result<(), ServerError>
    where
        F: FnMut(Frame, SingleResponse<T::Stream>) + Send + 'static,
    {
        self.on(
            FrameType::RequestResponse.as_u16(),
            Handler::request_response(f),
        )
    }

    pub fn on_request_stream<F>(&mut self, f: F) -> Result<(), ServerError>
    where
        F: FnMut(Frame, StreamResponse<T::Stream>) + Send + 'static,
    {
        self.on(FrameType::RequestStream.as_u16(), Handler::request_stream(f))
    }

    /// Registers a frame-only handler, e.g. for SETUP or CANCEL.
    pub fn on_frame<F>(&mut self, frame_type: FrameType, f: F) -> Result<(), ServerError>
    where
        F: FnMut(Frame) + Send + 'static,
    {
        self.on(frame_type.as_u16(), Handler::frame(f))
    }

    /// Feeds one transport event into the engine.
    pub fn handle_event(&mut self, event: ServerEvent<T::Stream>) -> Result<(), ServerError> {
        if self.closed {
            if let ServerEvent::Connected { mut stream, .. } = event {
                stream.close();
            }
            return Err(ServerError::Closed);
        }

        match event {
            ServerEvent::Connected { id, stream } => {
                tracing::info!("[{}] Client connected", id);
                self.sessions.insert(id, Session::new(id, stream));
                self.stats.connections_total += 1;
                self.stats.connections_active = self.sessions.len() as u64;
                Ok(())
            }
            ServerEvent::Data { id, bytes } => self.on_data(id, bytes),
            ServerEvent::Error { id: Some(id), error } => {
                tracing::warn!("[{}] Transport error: {}", id, error);
                Ok(())
            }
            ServerEvent::Error { id: None, error } => {
                tracing::error!("Listener error: {}", error);
                Ok(())
            }
            ServerEvent::Closed { id } => {
                if self.sessions.remove(&id).is_some() {
                    tracing::info!("[{}] Client disconnected", id);
                }
                self.stats.connections_active = self.sessions.len() as u64;
                Ok(())
            }
        }
    }

    fn on_data(&mut self, id: u64, bytes: Bytes) -> Result<(), ServerError> {
        self.stats.frames_received += 1;

        let Some(session) = self.sessions.get_mut(&id) else {
            self.stats.frames_dropped += 1;
            return Err(ServerError::UnknownConnection(id));
        };
        session.record_frame();

        let frame = match Frame::parse(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("[{}] Dropping malformed frame: {}", id, e);
                self.drop_frame(
                    Diagnostic::new(DiagnosticKind::MalformedFrame)
                        .with_connection(id)
                        .with_detail(e.to_string()),
                );
                return Ok(());
            }
        };

        if let FrameBody::Setup(params) = &frame.body {
            if session.is_set_up() {
                tracing::warn!("[{}] Dropping duplicate SETUP", id);
                self.drop_frame(Diagnostic::new(DiagnosticKind::DuplicateSetup).with_connection(id));
                return Err(ServerError::DuplicateSetup(id));
            }

            session.complete_setup(params.clone())?;
            tracing::info!(
                "[{}] Setup complete (version={}, keepalive={}ms, data={})",
                id,
                params.version,
                params.keep_alive_interval,
                params.data_mime_type
            );
            if let Some(Handler::Frame(handler)) = self.registry.get_mut(FrameType::Setup) {
                handler(frame);
            }
            return Ok(());
        }

        if !session.is_set_up() {
            tracing::debug!(
                "[{}] Dropping frame type {:#06x} before SETUP",
                id,
                frame.header.frame_type
            );
            self.drop_frame(
                Diagnostic::new(DiagnosticKind::SetupRequired)
                    .with_connection(id)
                    .with_stream(frame.stream_id()),
            );
            return Ok(());
        }

        self.dispatch(id, frame);
        Ok(())
    }

    fn dispatch(&mut self, id: u64, frame: Frame) {
        let stream_id = frame.stream_id();
        let Some(sink) = self.sessions.get(&id).map(|session| session.stream().clone()) else {
            return;
        };
        let handler = frame
            .frame_type()
            .and_then(|frame_type| self.registry.get_mut(frame_type));

        match handler {
            Some(Handler::RequestResponse(handler)) => {
                tracing::debug!("[{}] REQUEST_RESPONSE on stream {}", id, stream_id);
                handler(frame, SingleResponse::new(stream_id, sink));
            }
            Some(Handler::RequestStream(handler)) => {
                let initial_n = match frame.body {
                    FrameBody::RequestStream { initial_n } => initial_n,
                    _ => 0,
                };
                tracing::debug!(
                    "[{}] REQUEST_STREAM on stream {} (initial_n={})",
                    id,
                    stream_id,
                    initial_n
                );
                handler(frame, StreamResponse::new(stream_id, initial_n, sink));
            }
            Some(Handler::Frame(handler)) => handler(frame),
            None => {
                tracing::debug!(
                    "[{}] No handler for frame type {:#06x}",
                    id,
                    frame.header.frame_type
                );
                self.drop_frame(
                    Diagnostic::new(DiagnosticKind::NoHandler)
                        .with_connection(id)
                        .with_stream(stream_id),
                );
            }
        }
    }

    fn drop_frame(&mut self, diagnostic: Diagnostic) {
        self.stats.frames_dropped += 1;
        if let Some(hook) = self.diagnostics.as_mut() {
            hook(&diagnostic);
        }
    }

    /// Closes every connection and the transport, then runs `callback`.
    pub fn close(&mut self, callback: Option<CloseCallback>) -> Result<(), ServerError> {
        if self.closed {
            return Err(ServerError::Closed);
        }
        tracing::info!("Closing server ({} connections)", self.sessions.len());

        for session in self.sessions.values_mut() {
            session.stream_mut().close();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        if let Some(callback) = callback {
            callback();
        }

        self.sessions.clear();
        self.registry.clear();
        self.stats.connections_active = 0;
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    pub fn session(&self, id: u64) -> Option<&Session<T::Stream>> {
        self.sessions.get(&id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use rsock_protocol::{
        cancel_frame, request_response_frame, request_stream_frame, setup_frame, ErrorCode,
        Payload, RecordingSink, SetupParams,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockTransport {
        listening: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    impl ServerTransport for MockTransport {
        type Stream = RecordingSink;

        fn establish_connection(&mut self) {
            self.listening.store(true, Ordering::SeqCst);
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn setup_bytes() -> Bytes {
        setup_frame(&SetupParams::default(), None).unwrap()
    }

    fn connect(server: &mut Server<MockTransport>, id: u64) -> RecordingSink {
        let sink = RecordingSink::new();
        server
            .handle_event(ServerEvent::Connected {
                id,
                stream: sink.clone(),
            })
            .unwrap();
        sink
    }

    fn data(id: u64, bytes: Bytes) -> ServerEvent<RecordingSink> {
        ServerEvent::Data { id, bytes }
    }

    fn diagnostics(server: &mut Server<MockTransport>) -> Arc<Mutex<Vec<Diagnostic>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        server.set_diagnostic_hook(Box::new(move |diag| sink.lock().unwrap().push(diag.clone())));
        seen
    }

    #[test]
    fn test_listen_starts_transport() {
        let transport = MockTransport::default();
        let listening = transport.listening.clone();
        let mut server = Server::new(transport);

        server.listen().unwrap();
        assert!(listening.load(Ordering::SeqCst));
    }

    #[test]
    fn test_request_response_roundtrip() {
        let mut server = Server::new(MockTransport::default());
        server
            .on_request_response(|frame, response| {
                assert_eq!(frame.metadata().unwrap().as_ref(), b"Some Request Response Meta");
                response
                    .respond(
                        Some(Bytes::from_static(b"{\"arg1\":\"yes\",\"arg2\":\"no\"}")),
                        Some(Bytes::from_static(b"Some Request Response Meta")),
                    )
                    .unwrap();
            })
            .unwrap();

        let sink = connect(&mut server, 1);
        server.handle_event(data(1, setup_bytes())).unwrap();
        assert_eq!(server.session(1).unwrap().state(), SessionState::SetUp);

        let payload = Payload::from_data("{\"arg1\":\"yes\",\"arg2\":\"no\"}")
            .with_metadata("Some Request Response Meta");
        let request = request_response_frame(4, Some(&payload)).unwrap();
        server.handle_event(data(1, request)).unwrap();

        let frames = sink.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body, FrameBody::Response);
        assert_eq!(frames[0].stream_id(), 4);
        assert!(frames[0].is_completed());
        assert_eq!(
            frames[0].data().unwrap().as_ref(),
            b"{\"arg1\":\"yes\",\"arg2\":\"no\"}"
        );
        assert_eq!(
            frames[0].metadata().unwrap().as_ref(),
            b"Some Request Response Meta"
        );
    }

    #[test]
    fn test_request_stream_dispatch() {
        let mut server = Server::new(MockTransport::default());
        server
            .on_request_stream(|_, mut response| {
                let n = response.initial_n();
                for i in 0..n {
                    response
                        .respond(i + 1 == n, Some(Bytes::from(i.to_string())), None)
                        .unwrap();
                }
            })
            .unwrap();

        let sink = connect(&mut server, 1);
        server.handle_event(data(1, setup_bytes())).unwrap();
        let request = request_stream_frame(2, 3, None).unwrap();
        server.handle_event(data(1, request)).unwrap();

        let frames = sink.frames();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.stream_id() == 2));
        let completed: Vec<bool> = frames.iter().map(|f| f.is_completed()).collect();
        assert_eq!(completed, vec![false, false, true]);
    }

    #[test]
    fn test_frames_before_setup_are_dropped() {
        let mut server = Server::new(MockTransport::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        server
            .on_request_response(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let seen = diagnostics(&mut server);

        let sink = connect(&mut server, 9);
        let request = request_response_frame(1, None).unwrap();
        server.handle_event(data(9, request)).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(sink.written().is_empty());
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].kind, DiagnosticKind::SetupRequired);
        assert_eq!(seen[0].connection, Some(9));
        assert_eq!(seen[0].stream_id, Some(1));
        assert_eq!(server.stats().frames_dropped, 1);
    }

    #[test]
    fn test_duplicate_setup_is_reported() {
        let mut server = Server::new(MockTransport::default());
        let setups = Arc::new(AtomicUsize::new(0));
        let counter = setups.clone();
        server
            .on_frame(FrameType::Setup, move |frame| {
                assert!(frame.setup().is_some());
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let seen = diagnostics(&mut server);

        connect(&mut server, 1);
        server.handle_event(data(1, setup_bytes())).unwrap();

        let second = setup_frame(&SetupParams::default().with_mime_types("x", "y"), None).unwrap();
        let err = server.handle_event(data(1, second)).unwrap_err();
        assert!(matches!(err, ServerError::DuplicateSetup(1)));
        assert_eq!(err.error_code(), ErrorCode::InvalidSetup);

        assert_eq!(setups.load(Ordering::SeqCst), 1);
        assert_eq!(
            server.session(1).unwrap().setup().unwrap().data_mime_type,
            "UTF-8"
        );
        assert_eq!(seen.lock().unwrap()[0].kind, DiagnosticKind::DuplicateSetup);
    }

    #[test]
    fn test_unhandled_and_malformed_frames_are_dropped() {
        let mut server = Server::new(MockTransport::default());
        let seen = diagnostics(&mut server);
        connect(&mut server, 1);
        server.handle_event(data(1, setup_bytes())).unwrap();

        server
            .handle_event(data(1, cancel_frame(3).unwrap()))
            .unwrap();
        server
            .handle_event(data(1, Bytes::from_static(&[0, 0, 0, 9])))
            .unwrap();

        let kinds: Vec<DiagnosticKind> = seen.lock().unwrap().iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DiagnosticKind::NoHandler, DiagnosticKind::MalformedFrame]
        );
        let stats = server.stats();
        assert_eq!(stats.frames_received, 3);
        assert_eq!(stats.frames_dropped, 2);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let mut server = Server::new(MockTransport::default());
        server
            .on_request_response(|_, response| response.respond(None, None).unwrap())
            .unwrap();

        let first = connect(&mut server, 1);
        let second = connect(&mut server, 2);
        server.handle_event(data(1, setup_bytes())).unwrap();

        let request = request_response_frame(1, None).unwrap();
        server.handle_event(data(2, request.clone())).unwrap();
        server.handle_event(data(1, request)).unwrap();

        assert_eq!(first.frames().len(), 1);
        assert!(second.written().is_empty());
        assert_eq!(server.stats().connections_total, 2);
    }

    #[test]
    fn test_connection_closed_removes_session() {
        let mut server = Server::new(MockTransport::default());
        connect(&mut server, 5);
        assert_eq!(server.stats().connections_active, 1);

        server.handle_event(ServerEvent::Closed { id: 5 }).unwrap();
        assert_eq!(server.session_count(), 0);
        assert_eq!(server.stats().connections_active, 0);

        let err = server.handle_event(data(5, setup_bytes())).unwrap_err();
        assert!(matches!(err, ServerError::UnknownConnection(5)));
    }

    #[test]
    fn test_close() {
        let transport = MockTransport::default();
        let closed = transport.closed.clone();
        let mut server = Server::new(transport);
        server.on_request_response(|_, _| {}).unwrap();
        let sink = connect(&mut server, 1);

        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        server
            .close(Some(Box::new(move || flag.store(true, Ordering::SeqCst))))
            .unwrap();

        assert!(sink.is_closed());
        assert!(closed.load(Ordering::SeqCst));
        assert!(called.load(Ordering::SeqCst));
        assert!(server.is_closed());
        assert_eq!(server.session_count(), 0);

        assert!(matches!(server.close(None), Err(ServerError::Closed)));
        assert!(matches!(
            server.on_request_stream(|_, _| {}),
            Err(ServerError::Closed)
        ));

        let late = RecordingSink::new();
        let result = server.handle_event(ServerEvent::Connected {
            id: 2,
            stream: late.clone(),
        });
        assert!(matches!(result, Err(ServerError::Closed)));
        assert!(late.is_closed());
    }
}
