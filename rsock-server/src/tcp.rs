//! TCP transport and async runner for the server engine.

use crate::error::ServerError;
use crate::server::{Server, ServerStats};
use crate::transport::{ServerEvent, ServerTransport};
use bytes::Bytes;
use rsock_protocol::{
    error_frame, FrameDecoder, FrameSink, TransportError, DEFAULT_PORT, MAX_PAYLOAD_SIZE,
};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Runtime settings for a [`TcpServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: u32,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            max_connections: 1000,
            max_frame_size: MAX_PAYLOAD_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

enum Outbound {
    Frame(Bytes),
    Close,
}

/// Write half of one accepted connection, backed by a writer task.
#[derive(Clone)]
pub struct TcpSink {
    id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl TcpSink {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for TcpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSink").field("id", &self.id).finish()
    }
}

impl FrameSink for TcpSink {
    fn write(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

type EventSender = mpsc::UnboundedSender<ServerEvent<TcpSink>>;

/// Server transport that accepts TCP connections from a bound listener.
pub struct TcpAcceptor {
    listener: Option<TcpListener>,
    config: ServerConfig,
    events: EventSender,
    active: Arc<AtomicUsize>,
    accept_task: Option<JoinHandle<()>>,
}

impl TcpAcceptor {
    pub fn new(listener: TcpListener, config: ServerConfig, events: EventSender) -> Self {
        Self {
            listener: Some(listener),
            config,
            events,
            active: Arc::new(AtomicUsize::new(0)),
            accept_task: None,
        }
    }

    /// Number of open TCP connections.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

impl ServerTransport for TcpAcceptor {
    type Stream = TcpSink;

    fn establish_connection(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            self.config.clone(),
            self.events.clone(),
            self.active.clone(),
        )));
    }

    fn close(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        self.listener = None;
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    events: EventSender,
    active: Arc<AtomicUsize>,
) {
    let mut next_id: u64 = 1;

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if active.load(Ordering::Relaxed) >= config.max_connections {
                    tracing::warn!("Connection limit reached, rejecting {}", addr);
                    continue;
                }

                let id = next_id;
                next_id += 1;
                active.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("[{}] Accepted connection from {}", id, addr);
                spawn_connection(id, stream, &config, events.clone(), active.clone());
            }
            Err(e) => {
                let _ = events.send(ServerEvent::Error {
                    id: None,
                    error: TransportError::Io(e),
                });
            }
        }
    }
}

/// Reports the connection as closed however its reader ends.
struct ConnectionGuard {
    id: u64,
    events: EventSender,
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        let _ = self.events.send(ServerEvent::Closed { id: self.id });
    }
}

fn spawn_connection(
    id: u64,
    stream: TcpStream,
    config: &ServerConfig,
    events: EventSender,
    active: Arc<AtomicUsize>,
) {
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();

    let (tx, rx) = mpsc::unbounded_channel();
    if events
        .send(ServerEvent::Connected {
            id,
            stream: TcpSink { id, tx },
        })
        .is_err()
    {
        active.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    let guard = ConnectionGuard {
        id,
        events: events.clone(),
        active,
    };
    let decoder = FrameDecoder::new().with_max_payload_size(config.max_frame_size);
    let reader = tokio::spawn(read_loop(
        id,
        read_half,
        decoder,
        config.read_buffer_size,
        events.clone(),
        guard,
    ));
    tokio::spawn(write_loop(id, write_half, rx, reader.abort_handle(), events));
}

async fn read_loop(
    id: u64,
    mut reader: OwnedReadHalf,
    mut decoder: FrameDecoder,
    buffer_size: usize,
    events: EventSender,
    _guard: ConnectionGuard,
) {
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("[{}] Connection closed by client", id);
                return;
            }
            Ok(n) => n,
            Err(e) => {
                let _ = events.send(ServerEvent::Error {
                    id: Some(id),
                    error: TransportError::Io(e),
                });
                return;
            }
        };

        decoder.extend(&buf[..n]);
        loop {
            match decoder.decode_frame() {
                Ok(Some(bytes)) => {
                    if events.send(ServerEvent::Data { id, bytes }).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("[{}] Unrecoverable framing error: {}", id, e);
                    let err = io::Error::new(io::ErrorKind::InvalidData, e);
                    let _ = events.send(ServerEvent::Error {
                        id: Some(id),
                        error: TransportError::Io(err),
                    });
                    return;
                }
            }
        }
    }
}

async fn write_loop(
    id: u64,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    reader: AbortHandle,
    events: EventSender,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                if let Err(e) = writer.write_all(&frame).await {
                    let _ = events.send(ServerEvent::Error {
                        id: Some(id),
                        error: TransportError::Io(e),
                    });
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    let _ = writer.shutdown().await;
    reader.abort();
}

/// Signals a running [`TcpServer`] to stop.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// A server engine bound to a TCP listener.
pub struct TcpServer {
    local_addr: SocketAddr,
    engine: Server<TcpAcceptor>,
    events: mpsc::UnboundedReceiver<ServerEvent<TcpSink>>,
    shutdown: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl TcpServer {
    /// Binds the listener. Connections are accepted once [`TcpServer::run`] starts.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let (events_tx, events) = mpsc::unbounded_channel();
        let acceptor = TcpAcceptor::new(listener, config, events_tx);
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        Ok(Self {
            local_addr,
            engine: Server::new(acceptor),
            events,
            shutdown,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn engine(&self) -> &Server<TcpAcceptor> {
        &self.engine
    }

    /// Engine access for registering handlers before [`TcpServer::run`].
    pub fn engine_mut(&mut self) -> &mut Server<TcpAcceptor> {
        &mut self.engine
    }

    pub fn stats(&self) -> ServerStats {
        self.engine.stats()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    /// Accepts connections and drives the engine until shut down.
    pub async fn run(mut self) -> Result<ServerStats, ServerError> {
        self.engine.listen()?;
        tracing::info!("Server listening on {}", self.local_addr);

        loop {
            tokio::select! {
                Some(event) = self.events.recv() => {
                    if let Err(e) = self.engine.handle_event(event) {
                        tracing::debug!("Event rejected: {}", e);
                        if let ServerError::DuplicateSetup(id) = e {
                            self.reject_connection(id, &e);
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        let stats = self.engine.stats();
        self.engine.close(None)?;
        Ok(stats)
    }

    /// Answers a connection-level failure with an ERROR on stream 0.
    fn reject_connection(&self, id: u64, err: &ServerError) {
        let Some(session) = self.engine.session(id) else {
            return;
        };
        let mut sink = session.stream().clone();
        let code = err.error_code();

        match error_frame(0, code, &err.to_string()) {
            Ok(frame) => {
                if let Err(e) = sink.write(frame) {
                    tracing::warn!("[{}] Failed to write ERROR: {}", id, e);
                }
            }
            Err(e) => tracing::warn!("[{}] Failed to build ERROR: {}", id, e),
        }
        if code.is_connection_level() {
            tracing::info!("[{}] Closing connection ({})", id, code);
            sink.close();
        }
    }
}
