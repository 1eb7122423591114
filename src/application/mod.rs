//! Application layer: use cases composing the domain

pub mod call_controller;
pub mod device_manager;

pub use call_controller::{CallController, CallStatus};
pub use device_manager::DeviceManager;
