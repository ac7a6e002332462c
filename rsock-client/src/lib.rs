//! # rsock-client
//!
//! Client library for rsock.
//!
//! This crate provides:
//! - A synchronous connection engine that multiplexes requests by stream id
//! - Request queueing until the SETUP handshake has been written
//! - A TCP transport and an async [`Client`] built on tokio

pub mod client;
pub mod connection;
pub mod error;
pub mod tcp;
pub mod transport;

pub use client::{Client, ResponseStream};
pub use connection::{
    Connection, ConnectionConfig, ConnectionState, RequestKind, ResponseCallback, SentCallback,
    DEFAULT_INITIAL_N,
};
pub use error::ClientError;
pub use tcp::{TcpClientConfig, TcpSink, TcpTransport};
pub use transport::{ClientEvent, ClientTransport};
