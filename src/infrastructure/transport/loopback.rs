//! In-process loopback transport
//!
//! Two endpoints sharing one wire, modeling the transport contract well
//! enough to exercise the negotiator without any network:
//! - descriptions are accepted in either order per endpoint
//! - remote candidates delivered before the remote description are queued
//!   and applied once it arrives
//! - both endpoints report connected once each side holds both
//!   descriptions and at least one applied candidate
//! - closing one endpoint reports disconnected to the peer
//!
//! Test hooks inject connectivity failure and control whether a path
//! restart recovers.

use crate::domain::media::{LocalTrack, MediaKind};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::TrackId;
use crate::domain::transport::{
    DescriptionKind, IceCandidate, PeerTransport, SessionDescription, TransportEvent,
    TransportFactory, TransportState,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

struct EndpointState {
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending_candidates: Vec<IceCandidate>,
    applied_candidates: Vec<IceCandidate>,
    tracks: HashMap<MediaKind, TrackId>,
    events: mpsc::Sender<TransportEvent>,
    connected: bool,
    closed: bool,
}

impl EndpointState {
    fn new(events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            local_description: None,
            remote_description: None,
            pending_candidates: Vec::new(),
            applied_candidates: Vec::new(),
            tracks: HashMap::new(),
            events,
            connected: false,
            closed: false,
        }
    }

    fn negotiated(&self) -> bool {
        self.local_description.is_some()
            && self.remote_description.is_some()
            && !self.applied_candidates.is_empty()
    }
}

struct Wire {
    a: EndpointState,
    b: EndpointState,
    recover_on_restart: bool,
}

impl Wire {
    fn endpoint_mut(&mut self, side: Side) -> &mut EndpointState {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }

    fn endpoint(&self, side: Side) -> &EndpointState {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }
}

/// One half of a loopback pair.
pub struct LoopbackTransport {
    side: Side,
    wire: Arc<Mutex<Wire>>,
}

type Outbox = Vec<(mpsc::Sender<TransportEvent>, TransportEvent)>;

impl LoopbackTransport {
    /// Emit connected to both sides once both are fully negotiated.
    fn check_connected(wire: &mut Wire, outbox: &mut Outbox) {
        if wire.a.closed || wire.b.closed || wire.a.connected {
            return;
        }
        if wire.a.negotiated() && wire.b.negotiated() {
            wire.a.connected = true;
            wire.b.connected = true;
            outbox.push((
                wire.a.events.clone(),
                TransportEvent::StateChanged(TransportState::Connected),
            ));
            outbox.push((
                wire.b.events.clone(),
                TransportEvent::StateChanged(TransportState::Connected),
            ));
        }
    }

    async fn flush(outbox: Outbox) {
        for (tx, event) in outbox {
            let _ = tx.send(event).await;
        }
    }

    fn synthetic_candidate(side: Side) -> IceCandidate {
        let host = match side {
            Side::A => "10.0.0.1",
            Side::B => "10.0.0.2",
        };
        IceCandidate {
            candidate: format!("candidate:1 1 udp 2122260223 {host} 50000 typ host"),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    /// Outgoing track ids as the wire sees them, keyed by kind.
    pub async fn outgoing_tracks(&self) -> HashMap<MediaKind, TrackId> {
        let wire = self.wire.lock().await;
        wire.endpoint(self.side).tracks.clone()
    }

    /// Report connectivity failure on this endpoint.
    pub async fn inject_connectivity_failure(&self) {
        let mut outbox = Outbox::new();
        {
            let mut wire = self.wire.lock().await;
            let endpoint = wire.endpoint_mut(self.side);
            endpoint.connected = false;
            outbox.push((
                endpoint.events.clone(),
                TransportEvent::StateChanged(TransportState::Failed),
            ));
        }
        Self::flush(outbox).await;
    }

    /// Control whether the next `restart_ice` call recovers the
    /// connection (default) or fails again.
    pub async fn set_recover_on_restart(&self, recover: bool) {
        let mut wire = self.wire.lock().await;
        wire.recover_on_restart = recover;
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn attach_track(&self, track: &LocalTrack) -> Result<()> {
        let mut wire = self.wire.lock().await;
        let endpoint = wire.endpoint_mut(self.side);
        if endpoint.closed {
            return Err(CallError::SessionClosed);
        }
        endpoint.tracks.insert(track.kind(), track.id());
        Ok(())
    }

    async fn replace_track(&self, kind: MediaKind, track: &LocalTrack) -> Result<()> {
        let mut wire = self.wire.lock().await;
        let endpoint = wire.endpoint_mut(self.side);
        if endpoint.closed {
            return Err(CallError::SessionClosed);
        }
        if !endpoint.tracks.contains_key(&kind) {
            return Err(CallError::InvalidOperation(format!(
                "no outgoing {kind} track to replace"
            )));
        }
        endpoint.tracks.insert(kind, track.id());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let wire = self.wire.lock().await;
        if wire.endpoint(self.side).closed {
            return Err(CallError::SessionClosed);
        }
        Ok(SessionDescription {
            kind: DescriptionKind::Offer,
            sdp: format!("v=0 loopback offer {:?}", self.side),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let wire = self.wire.lock().await;
        let endpoint = wire.endpoint(self.side);
        if endpoint.closed {
            return Err(CallError::SessionClosed);
        }
        if endpoint.remote_description.is_none() {
            return Err(CallError::NegotiationFailed(
                "cannot answer without a remote offer".to_string(),
            ));
        }
        Ok(SessionDescription {
            kind: DescriptionKind::Answer,
            sdp: format!("v=0 loopback answer {:?}", self.side),
        })
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        let mut outbox = Outbox::new();
        {
            let mut wire = self.wire.lock().await;
            let endpoint = wire.endpoint_mut(self.side);
            if endpoint.closed {
                return Err(CallError::SessionClosed);
            }
            endpoint.local_description = Some(desc.clone());
            // path gathering starts with the local description
            outbox.push((
                endpoint.events.clone(),
                TransportEvent::LocalCandidate(Self::synthetic_candidate(self.side)),
            ));
            Self::check_connected(&mut wire, &mut outbox);
        }
        Self::flush(outbox).await;
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        let mut outbox = Outbox::new();
        {
            let mut wire = self.wire.lock().await;
            let endpoint = wire.endpoint_mut(self.side);
            if endpoint.closed {
                return Err(CallError::SessionClosed);
            }
            endpoint.remote_description = Some(desc.clone());
            let queued = std::mem::take(&mut endpoint.pending_candidates);
            endpoint.applied_candidates.extend(queued);
            Self::check_connected(&mut wire, &mut outbox);
        }
        Self::flush(outbox).await;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let mut outbox = Outbox::new();
        {
            let mut wire = self.wire.lock().await;
            let endpoint = wire.endpoint_mut(self.side);
            if endpoint.closed {
                return Err(CallError::SessionClosed);
            }
            if endpoint.remote_description.is_none() {
                endpoint.pending_candidates.push(candidate.clone());
            } else {
                endpoint.applied_candidates.push(candidate.clone());
                Self::check_connected(&mut wire, &mut outbox);
            }
        }
        Self::flush(outbox).await;
        Ok(())
    }

    async fn restart_ice(&self) -> Result<()> {
        let mut outbox = Outbox::new();
        {
            let mut wire = self.wire.lock().await;
            let recover = wire.recover_on_restart;
            let endpoint = wire.endpoint_mut(self.side);
            if endpoint.closed {
                return Err(CallError::SessionClosed);
            }
            let state = if recover {
                endpoint.connected = true;
                TransportState::Connected
            } else {
                TransportState::Failed
            };
            outbox.push((endpoint.events.clone(), TransportEvent::StateChanged(state)));
        }
        Self::flush(outbox).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut outbox = Outbox::new();
        {
            let mut wire = self.wire.lock().await;
            let endpoint = wire.endpoint_mut(self.side);
            if endpoint.closed {
                return Ok(());
            }
            endpoint.closed = true;
            endpoint.connected = false;
            outbox.push((
                endpoint.events.clone(),
                TransportEvent::StateChanged(TransportState::Closed),
            ));
            let peer = wire.endpoint_mut(self.side.other());
            if !peer.closed && peer.connected {
                peer.connected = false;
                outbox.push((
                    peer.events.clone(),
                    TransportEvent::StateChanged(TransportState::Disconnected),
                ));
            }
        }
        Self::flush(outbox).await;
        Ok(())
    }
}

/// One endpoint plus its event stream, ready to hand to a negotiator.
pub struct LoopbackEndpoint {
    transport: Arc<LoopbackTransport>,
    events: mpsc::Receiver<TransportEvent>,
}

impl LoopbackEndpoint {
    pub fn transport(&self) -> Arc<LoopbackTransport> {
        self.transport.clone()
    }

    pub fn into_parts(self) -> (Arc<dyn PeerTransport>, mpsc::Receiver<TransportEvent>) {
        (self.transport, self.events)
    }
}

/// Constructor for connected endpoint pairs.
pub struct LoopbackPair;

impl LoopbackPair {
    pub fn new() -> (LoopbackEndpoint, LoopbackEndpoint) {
        let (a_tx, a_rx) = mpsc::channel(EVENT_BUFFER);
        let (b_tx, b_rx) = mpsc::channel(EVENT_BUFFER);
        let wire = Arc::new(Mutex::new(Wire {
            a: EndpointState::new(a_tx),
            b: EndpointState::new(b_tx),
            recover_on_restart: true,
        }));
        (
            LoopbackEndpoint {
                transport: Arc::new(LoopbackTransport {
                    side: Side::A,
                    wire: wire.clone(),
                }),
                events: a_rx,
            },
            LoopbackEndpoint {
                transport: Arc::new(LoopbackTransport { side: Side::B, wire }),
                events: b_rx,
            },
        )
    }

    /// Factories for the two halves, one call attempt each.
    pub fn factories() -> (LoopbackFactory, LoopbackFactory) {
        let (a, b) = Self::new();
        (LoopbackFactory::new(a), LoopbackFactory::new(b))
    }
}

/// Hands out one pre-built endpoint, then refuses further calls.
pub struct LoopbackFactory {
    slot: Mutex<Option<LoopbackEndpoint>>,
}

impl LoopbackFactory {
    pub fn new(endpoint: LoopbackEndpoint) -> Self {
        Self {
            slot: Mutex::new(Some(endpoint)),
        }
    }

    /// Put a fresh endpoint in the slot for a subsequent call attempt.
    pub async fn refill(&self, endpoint: LoopbackEndpoint) {
        let mut slot = self.slot.lock().await;
        *slot = Some(endpoint);
    }
}

#[async_trait]
impl TransportFactory for LoopbackFactory {
    async fn create(
        &self,
    ) -> Result<(Arc<dyn PeerTransport>, mpsc::Receiver<TransportEvent>)> {
        let mut slot = self.slot.lock().await;
        match slot.take() {
            Some(endpoint) => Ok(endpoint.into_parts()),
            None => Err(CallError::InvalidOperation(
                "loopback endpoint already taken".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::DeviceId;

    fn candidate() -> IceCandidate {
        LoopbackTransport::synthetic_candidate(Side::A)
    }

    fn offer() -> SessionDescription {
        SessionDescription {
            kind: DescriptionKind::Offer,
            sdp: "v=0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_candidates_queue_until_remote_description() {
        let (a, _b) = LoopbackPair::new();
        let transport = a.transport();

        transport.add_remote_candidate(&candidate()).await.unwrap();
        {
            let wire = transport.wire.lock().await;
            assert_eq!(wire.a.pending_candidates.len(), 1);
            assert!(wire.a.applied_candidates.is_empty());
        }

        transport.set_remote_description(&offer()).await.unwrap();
        {
            let wire = transport.wire.lock().await;
            assert!(wire.a.pending_candidates.is_empty());
            assert_eq!(wire.a.applied_candidates.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_both_sides_connect_when_negotiated() {
        let (a, b) = LoopbackPair::new();
        let (ta, mut ea) = a.into_parts();
        let (tb, mut eb) = b.into_parts();

        let offer = ta.create_offer().await.unwrap();
        ta.set_local_description(&offer).await.unwrap();
        tb.set_remote_description(&offer).await.unwrap();
        let answer = tb.create_answer().await.unwrap();
        tb.set_local_description(&answer).await.unwrap();
        ta.set_remote_description(&answer).await.unwrap();
        ta.add_remote_candidate(&candidate()).await.unwrap();
        tb.add_remote_candidate(&candidate()).await.unwrap();

        let mut a_connected = false;
        while let Ok(event) =
            tokio::time::timeout(std::time::Duration::from_millis(100), ea.recv()).await
        {
            if event == Some(TransportEvent::StateChanged(TransportState::Connected)) {
                a_connected = true;
                break;
            }
        }
        assert!(a_connected);

        let mut b_connected = false;
        while let Ok(event) =
            tokio::time::timeout(std::time::Duration::from_millis(100), eb.recv()).await
        {
            if event == Some(TransportEvent::StateChanged(TransportState::Connected)) {
                b_connected = true;
                break;
            }
        }
        assert!(b_connected);
    }

    #[tokio::test]
    async fn test_close_reports_disconnect_to_peer() {
        let (a, b) = LoopbackPair::new();
        let (ta, _ea) = a.into_parts();
        let (tb, mut eb) = b.into_parts();

        // mark both connected by finishing negotiation
        let offer = ta.create_offer().await.unwrap();
        ta.set_local_description(&offer).await.unwrap();
        tb.set_remote_description(&offer).await.unwrap();
        let answer = tb.create_answer().await.unwrap();
        tb.set_local_description(&answer).await.unwrap();
        ta.set_remote_description(&answer).await.unwrap();
        ta.add_remote_candidate(&candidate()).await.unwrap();
        tb.add_remote_candidate(&candidate()).await.unwrap();

        ta.close().await.unwrap();
        ta.close().await.unwrap();

        let mut saw_disconnect = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(100), eb.recv()).await
        {
            if event == TransportEvent::StateChanged(TransportState::Disconnected) {
                saw_disconnect = true;
                break;
            }
        }
        assert!(saw_disconnect);
    }

    #[tokio::test]
    async fn test_replace_track_requires_attached_kind() {
        let (a, _b) = LoopbackPair::new();
        let transport = a.transport();
        let video = LocalTrack::new(MediaKind::Video, DeviceId::new("cam-1"));

        let err = transport
            .replace_track(MediaKind::Video, &video)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidOperation(_)));

        transport.attach_track(&video).await.unwrap();
        let other = LocalTrack::new(MediaKind::Video, DeviceId::new("cam-2"));
        transport
            .replace_track(MediaKind::Video, &other)
            .await
            .unwrap();
        assert_eq!(
            transport.outgoing_tracks().await[&MediaKind::Video],
            other.id()
        );
    }
}
