//! # rsock-server
//!
//! Server for rsock.
//!
//! This crate provides:
//! - A synchronous server engine with per-connection SETUP enforcement
//! - Frame-type handler registry with shape checks at registration
//! - Response handles for request/response and request/stream interactions
//! - A TCP transport and async runner built on tokio
//! - YAML + environment configuration

pub mod config;
pub mod error;
pub mod handler;
pub mod response;
pub mod server;
pub mod session;
pub mod tcp;
pub mod transport;

pub use config::{Config, ConfigError, NetworkConfig, ProtocolConfig};
pub use error::ServerError;
pub use handler::{Handler, HandlerRegistry};
pub use response::{respond, SingleResponse, StreamResponse};
pub use server::{CloseCallback, Server, ServerStats};
pub use session::{Session, SessionState};
pub use tcp::{ServerConfig, ShutdownHandle, TcpAcceptor, TcpServer, TcpSink};
pub use transport::{ServerEvent, ServerTransport};
