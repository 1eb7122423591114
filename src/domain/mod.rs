//! Domain layer: call negotiation core, ports, and value objects

pub mod media;
pub mod relay;
pub mod room;
pub mod session;
pub mod shared;
pub mod signaling;
pub mod transport;
