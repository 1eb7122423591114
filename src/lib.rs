//! duocall - a two-participant call engine
//!
//! Acquires local capture streams, negotiates a peer-to-peer media
//! connection, and relays the offer/answer/candidate exchange through a
//! hierarchical publish/subscribe relay store keyed by a room token.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use domain::shared::error::CallError;
pub use domain::shared::result::Result;
