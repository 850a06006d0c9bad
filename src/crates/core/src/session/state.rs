//! Session state machine
//!
//! Sole arbiter of single-flight: load, generate and close are mutually
//! exclusive, and every public operation is gated on the current state.
//! Violated preconditions are signaled errors, never panics.

use serde::Serialize;
use std::sync::Mutex;

use crate::util::errors::{QuillError, QuillResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unloaded,
    Loading,
    Ready,
    Generating,
    /// Observably identical to `Unloaded` for subsequent loads.
    Closed,
}

pub(crate) struct StateMachine {
    state: Mutex<SessionState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Unloaded),
        }
    }

    pub fn current(&self) -> SessionState {
        *self.state.lock().expect("session state lock poisoned")
    }

    /// `Unloaded | Ready | Closed -> Loading`. Rejected while a load or a
    /// generation is in flight.
    pub fn begin_load(&self) -> QuillResult<()> {
        let mut state = self.state.lock().expect("session state lock poisoned");
        match *state {
            SessionState::Loading => Err(QuillError::InvalidState(
                "a model load is already in flight".into(),
            )),
            SessionState::Generating => Err(QuillError::InvalidState(
                "cannot load while generating".into(),
            )),
            _ => {
                *state = SessionState::Loading;
                Ok(())
            }
        }
    }

    /// `Loading -> Ready` on success, `Loading -> Unloaded` on failure.
    pub fn finish_load(&self, success: bool) {
        let mut state = self.state.lock().expect("session state lock poisoned");
        *state = if success {
            SessionState::Ready
        } else {
            SessionState::Unloaded
        };
    }

    /// `Ready -> Generating`. Rejected in every other state.
    pub fn begin_generation(&self) -> QuillResult<()> {
        let mut state = self.state.lock().expect("session state lock poisoned");
        match *state {
            SessionState::Ready => {
                *state = SessionState::Generating;
                Ok(())
            }
            SessionState::Generating => Err(QuillError::InvalidState(
                "a generation is already in flight".into(),
            )),
            SessionState::Loading => Err(QuillError::InvalidState(
                "cannot generate while loading".into(),
            )),
            other => Err(QuillError::InvalidState(format!(
                "no model loaded (state: {:?})",
                other
            ))),
        }
    }

    /// `Generating -> Ready`, after the transcript has been updated.
    pub fn finish_generation(&self) {
        let mut state = self.state.lock().expect("session state lock poisoned");
        *state = SessionState::Ready;
    }

    /// `* -> Closed`, except while a load or generation owns the resources.
    /// Closing an already-closed session is an accepted no-op.
    pub fn begin_close(&self) -> QuillResult<()> {
        let mut state = self.state.lock().expect("session state lock poisoned");
        match *state {
            SessionState::Loading | SessionState::Generating => Err(QuillError::InvalidState(
                "cannot close while background work is in flight".into(),
            )),
            _ => {
                *state = SessionState::Closed;
                Ok(())
            }
        }
    }

    /// Unconditional `* -> Closed`. Fatal-error path only.
    pub fn mark_closed(&self) {
        let mut state = self.state.lock().expect("session state lock poisoned");
        *state = SessionState::Closed;
    }
}
