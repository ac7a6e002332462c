//! Client-side transport capability.

use bytes::Bytes;
use rsock_protocol::{FrameSink, TransportError};

/// A transport that can open one connection at a time for a client engine.
///
/// `establish_connection` only starts the attempt. The outcome comes back
/// to the engine as a [`ClientEvent`].
pub trait ClientTransport: Send {
    type Stream: FrameSink;

    fn establish_connection(&mut self);

    fn close(&mut self);

    /// Tears the transport down immediately. Defaults to [`ClientTransport::close`].
    fn destroy(&mut self) {
        self.close();
    }
}

/// Events a client transport delivers to its engine.
#[derive(Debug)]
pub enum ClientEvent<S> {
    /// A connection is ready for use.
    Connected(S),
    /// One complete inbound frame.
    Data(Bytes),
    Error(TransportError),
    /// The peer closed the connection.
    Closed,
}
