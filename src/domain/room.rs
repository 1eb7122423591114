//! Room membership: role assignment and the page-location contract

use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::RoomId;
use serde::{Deserialize, Serialize};

/// The two fixed roles in a call.
///
/// Assigned once at page load from the presence of a room token; glare
/// cannot occur because role assignment is static and exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Creates the room, sends the offer, consumes the answer
    Initiator,
    /// Joins an existing room, consumes the offer, sends the answer
    Receiver,
}

impl Role {
    /// The opposite role
    pub fn peer(&self) -> Role {
        match self {
            Role::Initiator => Role::Receiver,
            Role::Receiver => Role::Initiator,
        }
    }

    /// Relay key segment for this role's candidate stream
    pub fn as_key(&self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Receiver => "receiver",
        }
    }
}

/// Addressable location of a call page: origin, path, and an optional
/// `room` query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    origin: String,
    path: String,
    room: Option<RoomId>,
}

impl PageLocation {
    pub fn new(origin: impl Into<String>, path: impl Into<String>, room: Option<RoomId>) -> Self {
        Self {
            origin: origin.into(),
            path: path.into(),
            room,
        }
    }

    /// Parse a full URL of the form `<origin><path>?room=<token>`.
    ///
    /// Only the `room` query parameter is interpreted; everything else in
    /// the query string is ignored.
    pub fn parse(url: &str) -> Result<Self> {
        let scheme_end = url.find("://").ok_or_else(|| {
            CallError::InvalidOperation(format!("location has no scheme: {url}"))
        })?;
        let rest = &url[scheme_end + 3..];
        let path_start = rest.find('/').unwrap_or(rest.len());
        let origin = url[..scheme_end + 3 + path_start].to_string();

        let path_and_query = &rest[path_start..];
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };
        let path = if path.is_empty() { "/" } else { path };

        let mut room = None;
        if let Some(query) = query {
            for pair in query.split('&') {
                if let Some((key, value)) = pair.split_once('=') {
                    if key == "room" && !value.is_empty() {
                        room = Some(RoomId::parse(value)?);
                    }
                }
            }
        }

        Ok(Self {
            origin,
            path: path.to_string(),
            room,
        })
    }

    /// Assign a room and role for this location.
    ///
    /// No token present means this instance creates the room: a fresh
    /// token is generated, the location is rewritten in place, and the
    /// initiator role is adopted. Otherwise the existing token is joined
    /// as receiver.
    pub fn assign_room(&mut self, token_length: usize) -> (RoomId, Role) {
        match &self.room {
            Some(room) => (room.clone(), Role::Receiver),
            None => {
                let room = RoomId::generate(token_length);
                self.room = Some(room.clone());
                (room, Role::Initiator)
            }
        }
    }

    /// Shareable link for the current room
    pub fn share_link(&self) -> String {
        match &self.room {
            Some(room) => format!("{}{}?room={}", self.origin, self.path, room),
            None => format!("{}{}", self.origin, self.path),
        }
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }
}
