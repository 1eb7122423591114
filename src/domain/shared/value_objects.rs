//! Shared value objects used across the call domain

use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Characters allowed in a room token, matching the original short
/// base-36 links.
const TOKEN_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Default room token length
pub const DEFAULT_TOKEN_LENGTH: usize = 7;

/// Room identifier: an opaque short alphanumeric token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    /// Generate a fresh random token
    pub fn generate(length: usize) -> Self {
        let mut rng = rand::thread_rng();
        let token: String = (0..length.max(1))
            .map(|_| TOKEN_CHARS[rng.gen_range(0..TOKEN_CHARS.len())] as char)
            .collect();
        Self(token)
    }

    /// Validate and adopt an existing token
    pub fn parse(token: &str) -> Result<Self> {
        if token.is_empty() || token.len() > 64 {
            return Err(CallError::InvalidOperation(format!(
                "invalid room token length: {}",
                token.len()
            )));
        }
        if !token.bytes().all(|b| TOKEN_CHARS.contains(&b)) {
            return Err(CallError::InvalidOperation(format!(
                "room token contains invalid characters: {token:?}"
            )));
        }
        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media track identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local stream identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capture device identifier, opaque to the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_token_generation() {
        let room = RoomId::generate(DEFAULT_TOKEN_LENGTH);
        assert_eq!(room.as_str().len(), DEFAULT_TOKEN_LENGTH);
        assert!(room
            .as_str()
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[test]
    fn test_room_token_parse() {
        assert!(RoomId::parse("ab12cde").is_ok());
        assert!(RoomId::parse("").is_err());
        assert!(RoomId::parse("AB12CDE").is_err());
        assert!(RoomId::parse("ab12 cd").is_err());
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = RoomId::generate(DEFAULT_TOKEN_LENGTH);
        let b = RoomId::generate(DEFAULT_TOKEN_LENGTH);
        assert_ne!(a, b);
    }

    #[test]
    fn test_track_id_uniqueness() {
        assert_ne!(TrackId::new(), TrackId::new());
    }
}
