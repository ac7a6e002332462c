//! TCP transport for the client engine.

use crate::transport::{ClientEvent, ClientTransport};
use bytes::Bytes;
use rsock_protocol::{FrameDecoder, FrameSink, TransportError};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// TCP transport configuration.
#[derive(Debug, Clone)]
pub struct TcpClientConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl TcpClientConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
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

/// Write half of a TCP connection, backed by a writer task.
#[derive(Debug, Clone)]
pub struct TcpSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outbound::Frame(frame) => write!(f, "Frame({} bytes)", frame.len()),
            Outbound::Close => write!(f, "Close"),
        }
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

/// Client transport that connects over TCP and reports through an event channel.
pub struct TcpTransport {
    config: TcpClientConfig,
    events: mpsc::UnboundedSender<ClientEvent<TcpSink>>,
    connect_task: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Creates a transport and the receiver its events arrive on.
    pub fn new(config: TcpClientConfig) -> (Self, mpsc::UnboundedReceiver<ClientEvent<TcpSink>>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            config,
            events,
            connect_task: None,
        };
        (transport, rx)
    }

    pub fn config(&self) -> &TcpClientConfig {
        &self.config
    }
}

impl ClientTransport for TcpTransport {
    type Stream = TcpSink;

    fn establish_connection(&mut self) {
        if let Some(task) = &self.connect_task {
            if !task.is_finished() {
                return;
            }
        }
        let config = self.config.clone();
        let events = self.events.clone();
        self.connect_task = Some(tokio::spawn(connect(config, events)));
    }

    fn close(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
    }
}

async fn connect(config: TcpClientConfig, events: mpsc::UnboundedSender<ClientEvent<TcpSink>>) {
    tracing::debug!("Connecting to {}...", config.addr);

    let stream = match tokio::time::timeout(
        config.connect_timeout,
        TcpStream::connect(config.addr),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::debug!("Connection failed: {}", e);
            let _ = events.send(ClientEvent::Error(TransportError::Io(e)));
            return;
        }
        Err(_) => {
            tracing::debug!("Connection timeout");
            let err = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
            let _ = events.send(ClientEvent::Error(TransportError::Io(err)));
            return;
        }
    };

    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();

    let (tx, rx) = mpsc::unbounded_channel();
    if events
        .send(ClientEvent::Connected(TcpSink { tx: tx.clone() }))
        .is_err()
    {
        return;
    }
    tracing::debug!("TCP connected to {}", config.addr);

    let guard = Arc::new(ConnectionGuard {
        events: events.clone(),
    });
    let reader = tokio::spawn(read_loop(
        read_half,
        config.read_buffer_size,
        events.clone(),
        tx,
        guard.clone(),
    ));
    tokio::spawn(write_loop(write_half, rx, reader.abort_handle(), events, guard));
}

/// Shared by the reader and writer tasks. `Closed` is sent once both have ended.
struct ConnectionGuard {
    events: mpsc::UnboundedSender<ClientEvent<TcpSink>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let _ = self.events.send(ClientEvent::Closed);
    }
}

async fn read_loop(
    reader: OwnedReadHalf,
    buffer_size: usize,
    events: mpsc::UnboundedSender<ClientEvent<TcpSink>>,
    writer: mpsc::UnboundedSender<Outbound>,
    _guard: Arc<ConnectionGuard>,
) {
    read_frames(reader, buffer_size, &events).await;
    // Stop the writer so the connection is torn down as a whole.
    let _ = writer.send(Outbound::Close);
}

async fn read_frames(
    mut reader: OwnedReadHalf,
    buffer_size: usize,
    events: &mpsc::UnboundedSender<ClientEvent<TcpSink>>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("read_loop: connection closed");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                let _ = events.send(ClientEvent::Error(TransportError::Io(e)));
                return;
            }
        };

        decoder.extend(&buf[..n]);
        loop {
            match decoder.decode_frame() {
                Ok(Some(frame)) => {
                    if events.send(ClientEvent::Data(frame)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("read_loop: unrecoverable framing error: {}", e);
                    let err = io::Error::new(io::ErrorKind::InvalidData, e);
                    let _ = events.send(ClientEvent::Error(TransportError::Io(err)));
                    return;
                }
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    reader: AbortHandle,
    events: mpsc::UnboundedSender<ClientEvent<TcpSink>>,
    _guard: Arc<ConnectionGuard>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                if let Err(e) = writer.write_all(&frame).await {
                    tracing::debug!("write_loop: write failed: {}", e);
                    let _ = events.send(ClientEvent::Error(TransportError::Io(e)));
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    drop(rx);
    let _ = writer.shutdown().await;
    reader.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TcpClientConfig::new("127.0.0.1:7474".parse().unwrap());
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config =
            TcpClientConfig::new("127.0.0.1:7474".parse().unwrap()).with_read_buffer_size(100); // Below minimum
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = TcpClientConfig::new("127.0.0.1:7474".parse().unwrap())
            .with_read_buffer_size(10 * 1024 * 1024); // Above maximum
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_peer_close_reports_closed_once() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut transport, mut events) = TcpTransport::new(TcpClientConfig::new(addr));
        transport.establish_connection();

        let (socket, _) = listener.accept().await.unwrap();
        let mut sink = match events.recv().await {
            Some(ClientEvent::Connected(sink)) => sink,
            other => panic!("expected connected, got {:?}", other),
        };
        drop(socket);

        match events.recv().await {
            Some(ClientEvent::Closed) => {}
            other => panic!("expected closed, got {:?}", other),
        }
        assert!(
            tokio::time::timeout(Duration::from_millis(100), events.recv())
                .await
                .is_err(),
            "closed must be reported once"
        );

        // Writer task is gone, so the sink reports the dead connection.
        assert!(matches!(
            sink.write(Bytes::from_static(b"x")),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_reports_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (mut transport, mut events) = TcpTransport::new(TcpClientConfig::new(addr));
        transport.establish_connection();

        match events.recv().await {
            Some(ClientEvent::Error(TransportError::Io(_))) => {}
            other => panic!("expected connect error, got {:?}", other),
        }
    }
}
