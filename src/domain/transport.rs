//! Peer transport port
//!
//! The transport (description creation, codec negotiation, path discovery,
//! media delivery) is a black box behind [`PeerTransport`]. The engine
//! drives it with descriptions and candidates and observes it through
//! [`TransportEvent`]s.

use crate::domain::media::{LocalTrack, MediaKind};
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Signaling payload type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// A session description: payload type plus an opaque format string.
///
/// Wire shape matches the original JSON encoding
/// (`{"type":"offer","sdp":"..."}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    pub sdp: String,
}

/// A single proposed network path, opaque to the engine.
///
/// Wire shape matches the original candidate JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Transport-reported connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Notifications emitted by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A local candidate was discovered during path gathering
    LocalCandidate(IceCandidate),
    /// Overall connection state changed
    StateChanged(TransportState),
}

/// Peer transport port.
///
/// Contract notes:
/// - `add_remote_candidate` must accept candidates delivered before the
///   remote description is set, queuing them internally until it is. The
///   negotiator does not buffer candidates itself.
/// - `restart_ice` re-runs path discovery without renegotiating roles or
///   descriptions.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn attach_track(&self, track: &LocalTrack) -> Result<()>;

    async fn replace_track(&self, kind: MediaKind, track: &LocalTrack) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()>;

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    async fn restart_ice(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates one transport per call attempt, together with its event stream.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
    ) -> Result<(
        std::sync::Arc<dyn PeerTransport>,
        mpsc::Receiver<TransportEvent>,
    )>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_wire_shape() {
        let desc = SessionDescription {
            kind: DescriptionKind::Offer,
            sdp: "v=0".to_string(),
        };
        let json = serde_json::to_string(&desc).unwrap();
        assert_eq!(json, r#"{"type":"offer","sdp":"v=0"}"#);

        let parsed: SessionDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, desc);
    }

    #[test]
    fn test_candidate_wire_shape() {
        let json = r#"{"candidate":"candidate:1 1 udp 2122260223 192.168.1.2 53846 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let candidate: IceCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.username_fragment, None);
    }
}
