//! Negotiation state machine

use serde::{Deserialize, Serialize};

/// State of a single call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationState {
    /// No connection object exists
    Idle,
    /// Connection created, local tracks attached, listeners registered
    Connecting,
    /// Local description set; waiting for the transport to connect
    Negotiating,
    /// Transport reported a connected state
    Connected,
    /// Transport reported loss of connectivity; not retried
    Disconnected,
    /// Negotiation or connectivity failed terminally
    Failed,
    /// Terminal; a new call attempt builds a new instance
    Closed,
}

impl NegotiationState {
    /// Check if a state transition is valid
    pub fn can_transition_to(&self, new_state: &NegotiationState) -> bool {
        use NegotiationState::*;

        match (self, new_state) {
            // Closed is terminal
            (Closed, _) => false,

            // Any live state can be closed or fail
            (_, Closed) => true,
            (Failed, _) => false,
            (_, Failed) => true,

            (Idle, Connecting) => true,
            (Connecting, Negotiating) => true,
            // The transport may report connected before the negotiator
            // observes its own Negotiating transition
            (Connecting, Connected) => true,
            (Negotiating, Connected) => true,
            (Connected, Disconnected) => true,
            // The transport can recover from a reported disconnect on its own
            (Disconnected, Connected) => true,
            (Negotiating, Disconnected) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Closed | NegotiationState::Failed)
    }
}
