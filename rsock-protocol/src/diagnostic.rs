//! Structured reports for frames the engines drop.
//!
//! Dropping malformed or unroutable frames is the default behaviour. A
//! [`DiagnosticHook`] lets an application observe those drops without
//! changing what the engine does.

use std::fmt;

/// Why an engine reported a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Inbound bytes did not decode as a frame.
    MalformedFrame,
    /// No pending request matches the frame's stream id.
    UnmatchedStream,
    /// A non-SETUP frame arrived before the connection was set up.
    SetupRequired,
    /// A second SETUP frame arrived on a set-up connection.
    DuplicateSetup,
    /// No handler is registered for the frame type.
    NoHandler,
    /// Writing the SETUP frame failed.
    SetupWriteFailed,
}

impl DiagnosticKind {
    /// Returns whether this diagnostic accompanies a dropped inbound frame.
    pub fn is_drop(&self) -> bool {
        !matches!(self, DiagnosticKind::SetupWriteFailed)
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::MalformedFrame => "malformed_frame",
            DiagnosticKind::UnmatchedStream => "unmatched_stream",
            DiagnosticKind::SetupRequired => "setup_required",
            DiagnosticKind::DuplicateSetup => "duplicate_setup",
            DiagnosticKind::NoHandler => "no_handler",
            DiagnosticKind::SetupWriteFailed => "setup_write_failed",
        };
        f.write_str(name)
    }
}

/// One diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub stream_id: Option<u32>,
    /// Server-side connection id, if the engine tracks several connections.
    pub connection: Option<u64>,
    pub detail: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind) -> Self {
        Self {
            kind,
            stream_id: None,
            connection: None,
            detail: None,
        }
    }

    pub fn with_stream(mut self, stream_id: u32) -> Self {
        self.stream_id = Some(stream_id);
        self
    }

    pub fn with_connection(mut self, connection: u64) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Callback invoked for every diagnostic an engine emits.
pub type DiagnosticHook = Box<dyn FnMut(&Diagnostic) + Send>;
