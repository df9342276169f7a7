//! Session lifecycle state machine.

use serde::Serialize;

use crate::domain::foundation::StateMachine;

/// Lifecycle of a room session.
///
/// `Reconnecting` is entered from `Joined` whenever the channel transport
/// reports a drop, and exited back to `Joined` only after presence and the
/// message log have both completed a fresh snapshot/catch-up. A reconnect
/// that skips resynchronization is the bug class this machine exists to
/// prevent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session resources held.
    Idle,
    /// Transport opening, presence seeding, history loading.
    Joining,
    /// Fully synchronized; sends are accepted.
    Joined,
    /// Transport dropped; catch-up pending before sends resume.
    Reconnecting,
    /// Tear-down in progress.
    Leaving,
    /// Terminal: left, or torn down after a fatal error.
    Closed,
}

impl SessionState {
    /// True if `send` is accepted in this state.
    pub fn accepts_sends(&self) -> bool {
        matches!(self, SessionState::Joined)
    }

    /// True if the session still owns live resources.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Joining | SessionState::Joined | SessionState::Reconnecting
        )
    }
}

impl StateMachine for SessionState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Idle, Joining)
                | (Joining, Joined)
                | (Joining, Leaving)
                | (Joining, Closed)
                | (Joined, Reconnecting)
                | (Joined, Leaving)
                | (Joined, Closed)
                | (Reconnecting, Joined)
                | (Reconnecting, Leaving)
                | (Reconnecting, Closed)
                | (Leaving, Idle)
                | (Leaving, Closed)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SessionState::*;
        match self {
            Idle => vec![Joining],
            Joining => vec![Joined, Leaving, Closed],
            Joined => vec![Reconnecting, Leaving, Closed],
            Reconnecting => vec![Joined, Leaving, Closed],
            Leaving => vec![Idle, Closed],
            Closed => vec![],
        }
    }
}
