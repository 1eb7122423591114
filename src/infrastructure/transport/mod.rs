//! Peer transport adapters

pub mod loopback;
pub mod webrtc;

pub use loopback::{LoopbackFactory, LoopbackPair};
pub use webrtc::RtcTransportFactory;
