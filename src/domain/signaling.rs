//! Signaling channel: the room-scoped key space on the relay
//!
//! The only mutable state shared between peers. Four logical streams per
//! room: `offer` and `answer` (single values, last-write-wins) and one
//! append-only candidate list per role.
//!
//! Key layout under `rooms/<room>`:
//! - `offer`, `answer` - JSON-encoded session descriptions
//! - `candidates/initiator/<auto-id>`, `candidates/receiver/<auto-id>` -
//!   JSON-encoded candidates

use crate::domain::relay::RelayStore;
use crate::domain::room::Role;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::RoomId;
use crate::domain::transport::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub struct SignalingChannel {
    relay: Arc<dyn RelayStore>,
    room: RoomId,
}

impl SignalingChannel {
    pub fn new(relay: Arc<dyn RelayStore>, room: RoomId) -> Self {
        Self { relay, room }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    fn room_path(&self) -> String {
        format!("rooms/{}", self.room)
    }

    fn description_path(&self, role: Role) -> String {
        match role {
            Role::Initiator => format!("{}/offer", self.room_path()),
            Role::Receiver => format!("{}/answer", self.room_path()),
        }
    }

    fn candidates_path(&self, role: Role) -> String {
        format!("{}/candidates/{}", self.room_path(), role.as_key())
    }

    /// Overwrite the description slot owned by `role`.
    ///
    /// Unlike every other relay operation, a failure here aborts the
    /// negotiation, so the error is surfaced to the caller.
    pub async fn publish_description(
        &self,
        role: Role,
        description: &SessionDescription,
    ) -> Result<()> {
        let payload = serde_json::to_string(description)
            .map_err(|e| CallError::Internal(e.to_string()))?;
        let path = self.description_path(role);
        debug!(path = %path, kind = ?description.kind, "publishing description");
        self.relay
            .set(&path, payload)
            .await
            .map_err(|e| CallError::RelayWriteFailed(e.to_string()))
    }

    /// Append a candidate to the stream owned by `role`.
    pub async fn publish_candidate(&self, role: Role, candidate: &IceCandidate) -> Result<()> {
        let payload =
            serde_json::to_string(candidate).map_err(|e| CallError::Internal(e.to_string()))?;
        self.relay
            .push(&self.candidates_path(role), payload)
            .await
            .map_err(|e| CallError::RelayWriteFailed(e.to_string()))
    }

    /// Listen for the description slot owned by `role` (raw JSON values).
    pub async fn subscribe_description(&self, role: Role) -> Result<mpsc::Receiver<String>> {
        self.relay
            .subscribe_value(&self.description_path(role))
            .await
    }

    /// Listen for the candidate stream owned by `role` (raw JSON values).
    pub async fn subscribe_candidates(&self, role: Role) -> Result<mpsc::Receiver<String>> {
        self.relay
            .subscribe_children(&self.candidates_path(role))
            .await
    }

    /// Delete every key under the room.
    pub async fn teardown_room(&self) -> Result<()> {
        self.relay.remove(&self.room_path()).await
    }
}

/// Decode a relayed description value. Malformed values are treated by
/// callers the same as "no data yet".
pub fn decode_description(raw: &str) -> serde_json::Result<SessionDescription> {
    serde_json::from_str(raw)
}

/// Decode a relayed candidate value.
pub fn decode_candidate(raw: &str) -> serde_json::Result<IceCandidate> {
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::relay::MockRelayStore;
    use crate::domain::transport::DescriptionKind;
    use mockall::predicate::eq;

    fn offer() -> SessionDescription {
        SessionDescription {
            kind: DescriptionKind::Offer,
            sdp: "v=0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_description_goes_to_role_slot() {
        let mut relay = MockRelayStore::new();
        relay
            .expect_set()
            .with(eq("rooms/ab12cde/offer"), eq(r#"{"type":"offer","sdp":"v=0"}"#.to_string()))
            .times(1)
            .returning(|_, _| Ok(()));

        let channel = SignalingChannel::new(
            Arc::new(relay),
            RoomId::parse("ab12cde").unwrap(),
        );
        channel
            .publish_description(Role::Initiator, &offer())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_candidates_append_under_role_stream() {
        let mut relay = MockRelayStore::new();
        relay
            .expect_push()
            .withf(|path, _| path == "rooms/ab12cde/candidates/receiver")
            .times(1)
            .returning(|_, _| Ok(()));

        let channel = SignalingChannel::new(
            Arc::new(relay),
            RoomId::parse("ab12cde").unwrap(),
        );
        let candidate = IceCandidate {
            candidate: "candidate:1".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        channel
            .publish_candidate(Role::Receiver, &candidate)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_failure_is_relay_write_failed() {
        let mut relay = MockRelayStore::new();
        relay
            .expect_set()
            .returning(|_, _| Err(CallError::Internal("backend down".to_string())));

        let channel = SignalingChannel::new(
            Arc::new(relay),
            RoomId::parse("ab12cde").unwrap(),
        );
        let err = channel
            .publish_description(Role::Initiator, &offer())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::RelayWriteFailed(_)));
    }

    #[tokio::test]
    async fn test_teardown_removes_room_subtree() {
        let mut relay = MockRelayStore::new();
        relay
            .expect_remove()
            .with(eq("rooms/ab12cde"))
            .times(1)
            .returning(|_| Ok(()));

        let channel = SignalingChannel::new(
            Arc::new(relay),
            RoomId::parse("ab12cde").unwrap(),
        );
        channel.teardown_room().await.unwrap();
    }

    #[test]
    fn test_malformed_payloads_are_rejected() {
        assert!(decode_description("not json").is_err());
        assert!(decode_candidate("{\"half\":").is_err());
    }
}
