//! Shared result alias

use crate::domain::shared::error::CallError;

pub type Result<T> = std::result::Result<T, CallError>;
