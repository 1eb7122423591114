//! Typed events consumed by the negotiator's inbox
//!
//! Every external source (relay listeners, the transport) emits onto one
//! single-consumer inbox, preserving the single-threaded ordering
//! guarantee without locking.

use crate::domain::transport::{IceCandidate, SessionDescription, TransportState};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The peer's description appeared on the relay
    RemoteDescription(SessionDescription),
    /// A candidate from the peer's stream appeared on the relay
    RemoteCandidate(IceCandidate),
    /// The transport discovered a local candidate
    LocalCandidate(IceCandidate),
    /// The transport reported a connection state change
    TransportState(TransportState),
}
