//! Frame handlers and their registry.
//!
//! A handler's shape is fixed by the frame type it serves: REQUEST_RESPONSE
//! handlers get a [`SingleResponse`], REQUEST_STREAM handlers get a
//! [`StreamResponse`], and every other type gets only the frame. Shapes are
//! checked when a handler is registered.

use crate::error::ServerError;
use crate::response::{SingleResponse, StreamResponse};
use rsock_protocol::{Frame, FrameType};
use std::collections::HashMap;

/// A registered handler.
pub enum Handler<S> {
    RequestResponse(Box<dyn FnMut(Frame, SingleResponse<S>) + Send>),
    RequestStream(Box<dyn FnMut(Frame, StreamResponse<S>) + Send>),
    Frame(Box<dyn FnMut(Frame) + Send>),
}

impl<S> Handler<S> {
    pub fn request_response<F>(f: F) -> Self
    where
        F: FnMut(Frame, SingleResponse<S>) + Send + 'static,
    {
        Handler::RequestResponse(Box::new(f))
    }

    pub fn request_stream<F>(f: F) -> Self
    where
        F: FnMut(Frame, StreamResponse<S>) + Send + 'static,
    {
        Handler::RequestStream(Box::new(f))
    }

    pub fn frame<F>(f: F) -> Self
    where
        F: FnMut(Frame) + Send + 'static,
    {
        Handler::Frame(Box::new(f))
    }

    fn shape(&self) -> &'static str {
        match self {
            Handler::RequestResponse(_) => "request-response",
            Handler::RequestStream(_) => "request-stream",
            Handler::Frame(_) => "frame",
        }
    }
}

fn expected_shape(frame_type: FrameType) -> &'static str {
    match frame_type {
        FrameType::RequestResponse => "request-response",
        FrameType::RequestStream => "request-stream",
        _ => "frame",
    }
}

impl<S> std::fmt::Debug for Handler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler({})", self.shape())
    }
}

/// At most one handler per frame type.
pub struct HandlerRegistry<S> {
    handlers: HashMap<FrameType, Handler<S>>,
}

impl<S> Default for HandlerRegistry<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> HandlerRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for the frame type with wire code `code`.
    pub fn register(&mut self, code: u16, handler: Handler<S>) -> Result<(), ServerError> {
        let frame_type = FrameType::from_u16(code).ok_or(ServerError::InvalidFrameType(code))?;

        let expected = expected_shape(frame_type);
        if handler.shape() != expected {
            return Err(ServerError::HandlerMismatch {
                frame_type,
                expected,
            });
        }
        if self.handlers.contains_key(&frame_type) {
            return Err(ServerError::DuplicateHandlerRegistration(frame_type));
        }

        tracing::debug!("Registered {} handler for {}", expected, frame_type);
        self.handlers.insert(frame_type, handler);
        Ok(())
    }

    pub fn get_mut(&mut self, frame_type: FrameType) -> Option<&mut Handler<S>> {
        self.handlers.get_mut(&frame_type)
    }

    pub fn contains(&self, frame_type: FrameType) -> bool {
        self.handlers.contains_key(&frame_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}
