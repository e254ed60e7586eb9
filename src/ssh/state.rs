//! Connection lifecycle
//!
//! ```text
//! Disconnected ──Connect──► Connecting ──Established──► Connected
//!      ▲  Dead ──Connect──┘     │                          │
//!      │        ▲               └──Failed──► Dead ◄──Lost──┘
//!      └──Close── (any state)
//! ```

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Transport lost or connect failed; may reconnect
    Dead,
}

/// Events that move a connection between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connect,
    Established,
    Failed,
    Lost,
    Close,
}

#[derive(Debug, Clone, Error)]
#[error("cannot apply {transition:?} to a {from:?} connection")]
pub struct StateTransitionError {
    pub from: ConnectionState,
    pub transition: Transition,
}

impl ConnectionState {
    /// State after `transition`, or `None` if it does not apply here.
    pub fn next(self, transition: Transition) -> Option<ConnectionState> {
        use ConnectionState::*;
        match (self, transition) {
            (Disconnected | Dead, Transition::Connect) => Some(Connecting),
            (Connecting, Transition::Established) => Some(Connected),
            (Connecting, Transition::Failed) | (Connected, Transition::Lost) => Some(Dead),
            (_, Transition::Close) => Some(Disconnected),
            _ => None,
        }
    }

    pub fn apply(&mut self, transition: Transition) -> Result<(), StateTransitionError> {
        match self.next(transition) {
            Some(next) => {
                *self = next;
                Ok(())
            }
            None => Err(StateTransitionError {
                from: *self,
                transition,
            }),
        }
    }
}
