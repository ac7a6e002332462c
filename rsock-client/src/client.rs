//! High-level async client API.
//!
//! [`Client`] owns a [`Connection`] inside a driver task. Every call is sent
//! to that task as a command, so the engine is only ever touched from one
//! place.

use crate::connection::{Connection, ConnectionConfig, RequestKind, ResponseCallback};
use crate::error::ClientError;
use crate::tcp::{TcpClientConfig, TcpSink, TcpTransport};
use crate::transport::ClientEvent;
use rsock_protocol::{Frame, Payload};
use tokio::sync::{mpsc, oneshot};

enum Command {
    Connect,
    Request {
        kind: Option<RequestKind>,
        payload: Payload,
        callback: ResponseCallback,
        started: oneshot::Sender<Option<u32>>,
    },
    Cancel(u32),
    Close(oneshot::Sender<()>),
}

/// High-level client for rsock.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
}

impl Client {
    /// Creates a client. The connection is opened lazily by the first request
    /// or by [`Client::connect`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(tcp: TcpClientConfig, config: ConnectionConfig) -> Self {
        let (transport, events) = TcpTransport::new(tcp);
        let conn = Connection::new(transport, config);
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(conn, events, rx));
        Self { commands }
    }

    /// Starts connecting without sending a request.
    pub fn connect(&self) -> Result<(), ClientError> {
        self.send(Command::Connect)
    }

    /// Sends a request and waits for its single response.
    pub async fn request_response(&self, payload: Payload) -> Result<Frame, ClientError> {
        let (tx, rx) = oneshot::channel();
        let mut reply = Some(tx);
        let callback: ResponseCallback = Box::new(move |result| {
            if let Some(tx) = reply.take() {
                let _ = tx.send(result);
            }
        });

        self.start(Some(RequestKind::Response), payload, callback)
            .await?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Opens a response stream using the configured initial demand.
    pub async fn request_stream(&self, payload: Payload) -> Result<ResponseStream, ClientError> {
        self.open_stream(None, payload).await
    }

    /// Opens a response stream with an explicit initial demand.
    pub async fn request_stream_with(
        &self,
        payload: Payload,
        initial_n: u32,
    ) -> Result<ResponseStream, ClientError> {
        self.open_stream(Some(RequestKind::Stream { initial_n }), payload)
            .await
    }

    async fn open_stream(
        &self,
        kind: Option<RequestKind>,
        payload: Payload,
    ) -> Result<ResponseStream, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: ResponseCallback = Box::new(move |result| {
            let _ = tx.send(result);
        });

        let stream_id = self.start(kind, payload, callback).await?;
        Ok(ResponseStream {
            stream_id,
            rx,
            client: self.clone(),
        })
    }

    /// Closes the connection. Outstanding requests end with `ConnectionClosed`.
    pub async fn close(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Close(tx))?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Issues a request and waits until it is written, connecting first if needed.
    async fn start(
        &self,
        kind: Option<RequestKind>,
        payload: Payload,
        callback: ResponseCallback,
    ) -> Result<Option<u32>, ClientError> {
        let (started, rx) = oneshot::channel();
        self.send(Command::Request {
            kind,
            payload,
            callback,
            started,
        })?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }
}

/// Frames arriving on one REQUEST_STREAM.
pub struct ResponseStream {
    stream_id: Option<u32>,
    rx: mpsc::UnboundedReceiver<Result<Frame, ClientError>>,
    client: Client,
}

impl ResponseStream {
    /// Returns the next frame, or `None` once the stream has completed.
    pub async fn next(&mut self) -> Option<Result<Frame, ClientError>> {
        self.rx.recv().await
    }

    /// Stream id, or `None` if the request failed before being written.
    pub fn stream_id(&self) -> Option<u32> {
        self.stream_id
    }

    /// Cancels the stream. No further frames are delivered.
    pub fn cancel(mut self) -> Result<(), ClientError> {
        self.rx.close();
        match self.stream_id {
            Some(id) => self.client.send(Command::Cancel(id)),
            None => Ok(()),
        }
    }
}

async fn drive(
    mut conn: Connection<TcpTransport>,
    mut events: mpsc::UnboundedReceiver<ClientEvent<TcpSink>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    loop {
        let deadline = conn.next_deadline();
        tokio::select! {
            Some(event) = events.recv() => conn.handle_event(event),
            command = commands.recv() => match command {
                Some(Command::Connect) => {
                    if let Err(e) = conn.establish_connection() {
                        tracing::debug!("Connect ignored: {}", e);
                    }
                }
                Some(Command::Request { kind, payload, callback, started }) => {
                    let kind = kind.unwrap_or(RequestKind::Stream {
                        initial_n: conn.config().initial_n,
                    });
                    conn.submit(
                        kind,
                        payload,
                        callback,
                        Box::new(move |stream_id| {
                            let _ = started.send(stream_id);
                        }),
                    );
                }
                Some(Command::Cancel(stream_id)) => {
                    conn.cancel(stream_id);
                }
                Some(Command::Close(done)) => {
                    conn.close();
                    let _ = done.send(());
                    break;
                }
                None => {
                    conn.close();
                    break;
                }
            },
            _ = wait_until(deadline) => {
                conn.expire_pending(std::time::Instant::now());
            }
        }
    }
    tracing::debug!("Client driver stopped");
}

async fn wait_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        }
        None => std::future::pending().await,
    }
}
