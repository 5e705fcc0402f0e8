use std::time::{Duration, Instant};

use thiserror::Error;

/// Per-session state machine: `Pending -> Authenticated -> Closed`, with
/// `Failed` as a terminal alias for `Closed` reached via auth failure or
/// timeout (§4.2 "State machine").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Authenticated,
    Closed,
    Failed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionStateError {
    #[error("cannot transition from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }

    pub fn transition(self, next: SessionState) -> Result<SessionState, SessionStateError> {
        use SessionState::*;
        let allowed = matches!(
            (&self, &next),
            (Pending, Authenticated)
                | (Pending, Closed)
                | (Pending, Failed(_))
                | (Authenticated, Closed)
                | (Authenticated, Failed(_))
        );
        if allowed {
            Ok(next)
        } else {
            Err(SessionStateError::InvalidTransition { from: self, to: next })
        }
    }
}

/// Tracks `last_update` and answers whether a session has gone dormant.
#[derive(Debug, Clone, Copy)]
pub struct Activity {
    last_update: Instant,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_update = Instant::now();
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    pub fn is_dormant(&self, threshold: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_update) > threshold
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}
