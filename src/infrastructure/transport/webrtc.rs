//! WebRTC peer transport
//!
//! Binds the transport port to a real peer connection. The engine never
//! touches SDP internals or RTP; this adapter converts between the
//! domain's wire types and the library's, and mirrors connection state
//! changes onto the transport event stream.

use crate::config::IceConfig;
use crate::domain::media::{LocalTrack, MediaKind};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::transport::{
    DescriptionKind, IceCandidate, PeerTransport, SessionDescription, TransportEvent,
    TransportFactory, TransportState,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

const EVENT_BUFFER: usize = 64;

pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<MediaKind, Arc<RTCRtpSender>>>,
    /// Candidates received before the remote description, flushed after
    /// it is applied.
    pending_candidates: Mutex<Vec<IceCandidate>>,
}

impl RtcTransport {
    fn codec_capability(kind: MediaKind) -> RTCRtpCodecCapability {
        match kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        }
    }

    fn sample_track(track: &LocalTrack) -> Arc<TrackLocalStaticSample> {
        Arc::new(TrackLocalStaticSample::new(
            Self::codec_capability(track.kind()),
            track.id().to_string(),
            format!("duocall-{}", track.kind()),
        ))
    }

    fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription> {
        let converted = match desc.kind {
            DescriptionKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
            DescriptionKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
        };
        converted.map_err(|e| CallError::NegotiationFailed(e.to_string()))
    }

    fn to_candidate_init(candidate: &IceCandidate) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        }
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<TransportState> {
    match state {
        RTCPeerConnectionState::New => Some(TransportState::New),
        RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
        RTCPeerConnectionState::Connected => Some(TransportState::Connected),
        RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
        RTCPeerConnectionState::Failed => Some(TransportState::Failed),
        RTCPeerConnectionState::Closed => Some(TransportState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn attach_track(&self, track: &LocalTrack) -> Result<()> {
        let sample = Self::sample_track(track);
        let sender = self
            .pc
            .add_track(sample as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| CallError::Internal(e.to_string()))?;
        self.senders.lock().await.insert(track.kind(), sender);
        Ok(())
    }

    async fn replace_track(&self, kind: MediaKind, track: &LocalTrack) -> Result<()> {
        let senders = self.senders.lock().await;
        let sender = senders.get(&kind).ok_or_else(|| {
            CallError::InvalidOperation(format!("no outgoing {kind} track to replace"))
        })?;
        let sample = Self::sample_track(track);
        sender
            .replace_track(Some(sample as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| CallError::Internal(e.to_string()))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::NegotiationFailed(e.to_string()))?;
        Ok(SessionDescription {
            kind: DescriptionKind::Offer,
            sdp: offer.sdp,
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::NegotiationFailed(e.to_string()))?;
        Ok(SessionDescription {
            kind: DescriptionKind::Answer,
            sdp: answer.sdp,
        })
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(Self::to_rtc_description(desc)?)
            .await
            .map_err(|e| CallError::NegotiationFailed(e.to_string()))
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(Self::to_rtc_description(desc)?)
            .await
            .map_err(|e| CallError::NegotiationFailed(e.to_string()))?;

        let queued = std::mem::take(&mut *self.pending_candidates.lock().await);
        for candidate in queued {
            if let Err(err) = self
                .pc
                .add_ice_candidate(Self::to_candidate_init(&candidate))
                .await
            {
                warn!(error = %err, "queued candidate rejected");
            }
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        if self.pc.remote_description().await.is_none() {
            self.pending_candidates.lock().await.push(candidate.clone());
            return Ok(());
        }
        self.pc
            .add_ice_candidate(Self::to_candidate_init(candidate))
            .await
            .map_err(|e| CallError::NegotiationFailed(e.to_string()))
    }

    async fn restart_ice(&self) -> Result<()> {
        let offer = self
            .pc
            .create_offer(Some(RTCOfferOptions {
                ice_restart: true,
                ..Default::default()
            }))
            .await
            .map_err(|e| CallError::ConnectivityFailed(e.to_string()))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| CallError::ConnectivityFailed(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| CallError::Internal(e.to_string()))
    }
}

/// Builds one peer connection per call attempt from the ICE configuration.
pub struct RtcTransportFactory {
    ice: IceConfig,
}

impl RtcTransportFactory {
    pub fn new(ice: IceConfig) -> Self {
        Self { ice }
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice
                .servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ice_candidate_pool_size: self.ice.candidate_pool_size,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
    ) -> Result<(Arc<dyn PeerTransport>, mpsc::Receiver<TransportEvent>)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallError::Internal(e.to_string()))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| CallError::Internal(e.to_string()))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(self.rtc_configuration())
                .await
                .map_err(|e| CallError::Internal(e.to_string()))?,
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let candidate_tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx
                            .send(TransportEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }))
                            .await;
                    }
                    Err(err) => warn!(error = %err, "local candidate serialization failed"),
                }
            })
        }));

        let state_tx = events_tx;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                if let Some(mapped) = map_connection_state(state) {
                    let _ = tx.send(TransportEvent::StateChanged(mapped)).await;
                }
            })
        }));

        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            info!(
                id = %track.id(),
                kind = %track.kind(),
                "remote track arrived"
            );
            Box::pin(async {})
        }));

        Ok((
            Arc::new(RtcTransport {
                pc,
                senders: Mutex::new(HashMap::new()),
                pending_candidates: Mutex::new(Vec::new()),
            }),
            events_rx,
        ))
    }
}
