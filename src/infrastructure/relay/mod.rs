//! Relay store adapters

pub mod memory;

pub use memory::InMemoryRelay;
