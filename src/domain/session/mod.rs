//! Session negotiation: the offer/answer/candidate state machine

pub mod event;
pub mod negotiator;
pub mod state;

pub use event::SessionEvent;
pub use negotiator::SessionNegotiator;
pub use state::NegotiationState;
