//! Infrastructure layer: adapters binding the domain ports

pub mod media;
pub mod relay;
pub mod transport;
