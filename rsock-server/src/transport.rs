//! Server-side transport capability.

use bytes::Bytes;
use rsock_protocol::{FrameSink, TransportError};

/// A transport that accepts connections for a server engine.
///
/// Each accepted connection is identified by a transport-assigned id that
/// every later event for it carries.
pub trait ServerTransport: Send {
    type Stream: FrameSink + Clone;

    /// Starts accepting connections.
    fn establish_connection(&mut self);

    /// Stops accepting connections.
    fn close(&mut self);
}

/// Events a server transport delivers to its engine.
#[derive(Debug)]
pub enum ServerEvent<S> {
    Connected { id: u64, stream: S },
    /// One complete inbound frame.
    Data { id: u64, bytes: Bytes },
    /// A connection error, or a listener error when `id` is `None`.
    Error {
        id: Option<u64>,
        error: TransportError,
    },
    Closed { id: u64 },
}
