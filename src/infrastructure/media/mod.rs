//! Capture backend adapters

pub mod synthetic;

pub use synthetic::SyntheticMediaBackend;
