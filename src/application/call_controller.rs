//! Call controller: the engine's public surface
//!
//! One controller per joined room. It owns the device manager, spawns at
//! most one call session at a time, and maps negotiation states to a
//! coarse user-facing status.
//!
//! Stale-async protection: every call attempt carries a generation
//! number, bumped by `start_call` and `end_call`. A slow step that
//! completes after its generation was superseded abandons its work
//! instead of touching the newer attempt's resources.

use crate::application::device_manager::DeviceManager;
use crate::config::Config;
use crate::domain::media::{
    DeviceLists, DeviceRequest, LocalStream, MediaBackend, MediaKind, StreamConstraints,
};
use crate::domain::relay::RelayStore;
use crate::domain::room::{PageLocation, Role};
use crate::domain::session::{NegotiationState, SessionNegotiator};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{DeviceId, RoomId};
use crate::domain::signaling::SignalingChannel;
use crate::domain::transport::TransportFactory;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Coarse call status surfaced to the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum CallStatus {
    Idle,
    AcquiringMedia,
    Negotiating,
    Connected,
    ConnectionLost,
    Ended,
    Failed(CallError),
}

struct CallSession {
    negotiator: Arc<SessionNegotiator>,
    signaling: Arc<SignalingChannel>,
    monitor: JoinHandle<()>,
    started_at: DateTime<Utc>,
    connected_at: Arc<StdMutex<Option<DateTime<Utc>>>>,
}

struct ControllerInner {
    generation: u64,
    active: Option<CallSession>,
}

pub struct CallController {
    relay: Arc<dyn RelayStore>,
    devices: Arc<DeviceManager>,
    transports: Arc<dyn TransportFactory>,
    config: Config,
    location: PageLocation,
    room: RoomId,
    role: Role,
    inner: Mutex<ControllerInner>,
    status_tx: Arc<watch::Sender<CallStatus>>,
    status_rx: watch::Receiver<CallStatus>,
}

impl CallController {
    /// Join the room named in `url`, or create a fresh one when no room
    /// parameter is present. The first visitor of a room is always its
    /// initiator.
    pub fn join(
        url: &str,
        relay: Arc<dyn RelayStore>,
        backend: Arc<dyn MediaBackend>,
        transports: Arc<dyn TransportFactory>,
        config: Config,
    ) -> Result<Self> {
        let mut location = PageLocation::parse(url)?;
        let (room, role) = location.assign_room(config.room.token_length);
        info!(room = %room, role = ?role, "joined room");

        let (status_tx, status_rx) = watch::channel(CallStatus::Idle);
        Ok(Self {
            relay,
            devices: Arc::new(DeviceManager::new(backend)),
            transports,
            config,
            location,
            room,
            role,
            inner: Mutex::new(ControllerInner {
                generation: 0,
                active: None,
            }),
            status_tx: Arc::new(status_tx),
            status_rx,
        })
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Link the initiator hands to the other participant.
    pub fn share_link(&self) -> String {
        self.location.share_link()
    }

    pub fn status(&self) -> CallStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<CallStatus> {
        self.status_tx.subscribe()
    }

    pub async fn list_devices(&self) -> DeviceLists {
        self.devices.list_devices().await
    }

    pub async fn local_stream(&self) -> Option<LocalStream> {
        self.devices.current_stream().await
    }

    fn default_constraints(&self) -> StreamConstraints {
        StreamConstraints {
            video: self.config.media.video.then_some(DeviceRequest::Any),
            audio: self.config.media.audio.then_some(DeviceRequest::Any),
        }
    }

    /// Start a call with the configured default constraints.
    pub async fn start_call(&self) -> Result<()> {
        self.start_call_with(self.default_constraints()).await
    }

    /// Start a call: acquire media, create the transport, and hand both
    /// to a fresh negotiator.
    pub async fn start_call_with(&self, constraints: StreamConstraints) -> Result<()> {
        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.active.is_some() {
                return Err(CallError::InvalidOperation(
                    "a call is already active".to_string(),
                ));
            }
            inner.generation += 1;
            inner.generation
        };

        self.set_status(CallStatus::AcquiringMedia);
        match self.run_start(generation, constraints).await {
            Ok(()) => Ok(()),
            Err(CallError::SessionClosed) => {
                // superseded mid-flight; run_start already released the
                // resources this attempt acquired, and the status
                // belongs to whoever superseded it
                debug!(generation, "call attempt superseded");
                Err(CallError::SessionClosed)
            }
            Err(err) => {
                self.devices.release_stream().await;
                self.set_status(CallStatus::Failed(err.clone()));
                Err(err)
            }
        }
    }

    async fn run_start(&self, generation: u64, constraints: StreamConstraints) -> Result<()> {
        let stream = self.devices.acquire_stream(&constraints).await?;
        if let Err(err) = self.check_generation(generation).await {
            // end_call (or a newer attempt) won the race while the
            // acquisition was in flight; undo it
            self.devices.release_if_current(stream.id()).await;
            return Err(err);
        }

        let (transport, events) = self.transports.create().await?;
        if let Err(err) = self.check_generation(generation).await {
            let _ = transport.close().await;
            self.devices.release_if_current(stream.id()).await;
            return Err(err);
        }

        self.set_status(CallStatus::Negotiating);
        let signaling = Arc::new(SignalingChannel::new(self.relay.clone(), self.room.clone()));
        let negotiator = SessionNegotiator::connect(
            self.role,
            transport,
            events,
            signaling.clone(),
            &stream,
        )
        .await?;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            drop(inner);
            negotiator.close().await;
            self.devices.release_if_current(stream.id()).await;
            return Err(CallError::SessionClosed);
        }

        let connected_at = Arc::new(StdMutex::new(None));
        let monitor = tokio::spawn(monitor_status(
            negotiator.clone(),
            self.status_tx.clone(),
            connected_at.clone(),
        ));
        inner.active = Some(CallSession {
            negotiator,
            signaling,
            monitor,
            started_at: Utc::now(),
            connected_at,
        });
        Ok(())
    }

    async fn check_generation(&self, generation: u64) -> Result<()> {
        let inner = self.inner.lock().await;
        if inner.generation != generation {
            return Err(CallError::SessionClosed);
        }
        Ok(())
    }

    /// End the call and scrub the room from the relay. Idempotent; safe
    /// to call whatever the current state.
    pub async fn end_call(&self) {
        let session = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.active.take()
        };
        let Some(session) = session else {
            // no session, but an acquisition may still be in flight; the
            // generation bump above makes it stale, and any stream it
            // has already stored is released here
            self.devices.release_stream().await;
            self.set_status(CallStatus::Ended);
            debug!("end_call with no active session");
            return;
        };

        session.monitor.abort();
        session.negotiator.close().await;
        self.devices.release_stream().await;
        if let Err(err) = session.signaling.teardown_room().await {
            warn!(error = %err, "room teardown failed");
        }

        let connected = session.connected_at.lock().ok().and_then(|slot| *slot);
        match connected {
            Some(at) => {
                info!(
                    duration_secs = (Utc::now() - at).num_seconds(),
                    "call ended"
                );
            }
            None => {
                info!(
                    waited_secs = (Utc::now() - session.started_at).num_seconds(),
                    "call ended before connecting"
                );
            }
        }
        self.set_status(CallStatus::Ended);
    }

    /// Switch the outgoing video to a specific camera mid-call. The
    /// audio track keeps flowing untouched.
    pub async fn switch_camera(&self, device: DeviceId) -> Result<()> {
        self.switch_device(MediaKind::Video, device).await
    }

    /// Switch the outgoing audio to a specific microphone mid-call.
    pub async fn switch_microphone(&self, device: DeviceId) -> Result<()> {
        self.switch_device(MediaKind::Audio, device).await
    }

    async fn switch_device(&self, kind: MediaKind, device: DeviceId) -> Result<()> {
        let negotiator = {
            let inner = self.inner.lock().await;
            inner.active.as_ref().map(|s| s.negotiator.clone())
        };
        let track = self.devices.swap_device(kind, device).await?;
        // splice into the live transport when a session is up; before a
        // call the new track simply becomes part of the local stream
        if let Some(negotiator) = negotiator {
            negotiator.replace_track(kind, &track).await?;
        }
        Ok(())
    }

    fn set_status(&self, status: CallStatus) {
        debug!(status = ?status, "call status");
        self.status_tx.send_replace(status);
    }
}

/// Mirrors negotiation states onto the user-facing status channel.
async fn monitor_status(
    negotiator: Arc<SessionNegotiator>,
    status_tx: Arc<watch::Sender<CallStatus>>,
    connected_at: Arc<StdMutex<Option<DateTime<Utc>>>>,
) {
    let mut state_rx = negotiator.watch_state();
    loop {
        let state = *state_rx.borrow_and_update();
        match state {
            NegotiationState::Connected => {
                if let Ok(mut slot) = connected_at.lock() {
                    if slot.is_none() {
                        *slot = Some(Utc::now());
                        info!("call connected");
                    }
                }
                status_tx.send_replace(CallStatus::Connected);
            }
            NegotiationState::Disconnected => {
                status_tx.send_replace(CallStatus::ConnectionLost);
            }
            NegotiationState::Failed => {
                let err = negotiator.last_error().unwrap_or_else(|| {
                    CallError::ConnectivityFailed("transport failed".to_string())
                });
                status_tx.send_replace(CallStatus::Failed(err));
                break;
            }
            NegotiationState::Closed => break,
            NegotiationState::Idle
            | NegotiationState::Connecting
            | NegotiationState::Negotiating => {}
        }
        if state_rx.changed().await.is_err() {
            break;
        }
    }
}
