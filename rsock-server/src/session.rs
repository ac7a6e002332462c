//! Per-connection session state.

use crate::error::ServerError;
use rsock_protocol::SetupParams;
use std::time::{Duration, Instant};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the SETUP frame.
    AwaitingSetup,
    /// SETUP received; requests are dispatched.
    SetUp,
}

/// One accepted connection.
pub struct Session<S> {
    id: u64,
    stream: S,
    state: SessionState,
    setup: Option<SetupParams>,
    frames_received: u64,
    created_at: Instant,
}

impl<S> Session<S> {
    pub fn new(id: u64, stream: S) -> Self {
        Self {
            id,
            stream,
            state: SessionState::AwaitingSetup,
            setup: None,
            frames_received: 0,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_set_up(&self) -> bool {
        self.state == SessionState::SetUp
    }

    /// Parameters from the connection's SETUP frame.
    pub fn setup(&self) -> Option<&SetupParams> {
        self.setup.as_ref()
    }

    /// Records the SETUP parameters. Only the first SETUP is accepted.
    pub fn complete_setup(&mut self, params: SetupParams) -> Result<(), ServerError> {
        if self.state == SessionState::SetUp {
            return Err(ServerError::DuplicateSetup(self.id));
        }
        self.setup = Some(params);
        self.state = SessionState::SetUp;
        Ok(())
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub(crate) fn record_frame(&mut self) {
        self.frames_received += 1;
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let mut session = Session::new(3, ());
        assert_eq!(session.id(), 3);
        assert_eq!(session.state(), SessionState::AwaitingSetup);
        assert!(session.setup().is_none());

        let params = SetupParams::default().with_mime_types("a", "b");
        session.complete_setup(params.clone()).unwrap();
        assert!(session.is_set_up());
        assert_eq!(session.setup(), Some(&params));
    }

    #[test]
    fn test_duplicate_setup_keeps_first() {
        let mut session = Session::new(1, ());
        session
            .complete_setup(SetupParams::default().with_mime_types("first", "first"))
            .unwrap();

        let err = session
            .complete_setup(SetupParams::default().with_mime_types("second", "second"))
            .unwrap_err();
        assert!(matches!(err, ServerError::DuplicateSetup(1)));
        assert_eq!(session.setup().unwrap().data_mime_type, "first");
    }

    #[test]
    fn test_frame_counter() {
        let mut session = Session::new(1, ());
        session.record_frame();
        session.record_frame();
        assert_eq!(session.frames_received(), 2);
    }
}
