//! Session negotiator: drives one call attempt from first offer to teardown
//!
//! One instance per call attempt. All external inputs (relay listeners,
//! transport notifications) are funneled into a single-consumer inbox and
//! handled by one driver task, so events of one session are processed in
//! arrival order without shared mutable state.
//!
//! Role asymmetry:
//! - the initiator publishes an offer immediately and waits for an answer
//! - the receiver waits for an offer, then publishes an answer
//!
//! On the first connectivity failure the driver requests one path
//! restart from the transport; a second failure is terminal.

use crate::domain::media::{LocalStream, LocalTrack, MediaKind};
use crate::domain::room::Role;
use crate::domain::session::event::SessionEvent;
use crate::domain::session::state::NegotiationState;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::signaling::{self, SignalingChannel};
use crate::domain::transport::{
    DescriptionKind, PeerTransport, SessionDescription, TransportEvent, TransportState,
};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const INBOX_CAPACITY: usize = 64;

pub struct SessionNegotiator {
    role: Role,
    transport: Arc<dyn PeerTransport>,
    state_tx: Arc<watch::Sender<NegotiationState>>,
    state_rx: watch::Receiver<NegotiationState>,
    /// First error that pushed the session towards Failed
    failure: Arc<StdMutex<Option<CallError>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionNegotiator")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl SessionNegotiator {
    /// Build a negotiator over an already-created transport and start
    /// driving it.
    ///
    /// Attaches every track of `stream`, registers the relay listeners
    /// for the peer's description and candidate stream, and (for the
    /// initiator) publishes the offer. A failure anywhere in that
    /// sequence closes the transport and returns the error.
    pub async fn connect(
        role: Role,
        transport: Arc<dyn PeerTransport>,
        transport_events: mpsc::Receiver<TransportEvent>,
        signaling: Arc<SignalingChannel>,
        stream: &LocalStream,
    ) -> Result<Arc<Self>> {
        let (state_tx, state_rx) = watch::channel(NegotiationState::Idle);
        let state_tx = Arc::new(state_tx);
        let failure = Arc::new(StdMutex::new(None));

        let negotiator = Arc::new(Self {
            role,
            transport: transport.clone(),
            state_tx: state_tx.clone(),
            state_rx,
            failure: failure.clone(),
            tasks: Mutex::new(Vec::new()),
        });

        for track in stream.tracks() {
            if let Err(err) = transport.attach_track(track).await {
                let _ = transport.close().await;
                return Err(err);
            }
            debug!(kind = %track.kind(), track_id = %track.id(), "attached local track");
        }
        Self::transition(&state_tx, NegotiationState::Connecting);

        let peer = role.peer();
        let description_rx = match signaling.subscribe_description(peer).await {
            Ok(rx) => rx,
            Err(err) => {
                negotiator.close().await;
                return Err(err);
            }
        };
        let candidate_rx = match signaling.subscribe_candidates(peer).await {
            Ok(rx) => rx,
            Err(err) => {
                negotiator.close().await;
                return Err(err);
            }
        };

        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let driver = NegotiationDriver {
            role,
            transport: transport.clone(),
            signaling: signaling.clone(),
            state_tx: state_tx.clone(),
            inbox: inbox_rx,
            failure,
            remote_applied: false,
            restart_attempted: false,
        };

        {
            let mut tasks = negotiator.tasks.lock().await;
            tasks.push(tokio::spawn(forward_descriptions(
                description_rx,
                inbox_tx.clone(),
            )));
            tasks.push(tokio::spawn(forward_candidates(
                candidate_rx,
                inbox_tx.clone(),
            )));
            tasks.push(tokio::spawn(forward_transport_events(
                transport_events,
                inbox_tx,
            )));
            tasks.push(tokio::spawn(driver.run()));
        }

        if role == Role::Initiator {
            if let Err(err) = negotiator.send_offer(&signaling).await {
                negotiator.close().await;
                return Err(err);
            }
        }

        Ok(negotiator)
    }

    async fn send_offer(&self, signaling: &SignalingChannel) -> Result<()> {
        info!("creating offer");
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(&offer).await?;
        signaling.publish_description(self.role, &offer).await?;
        Self::transition(&self.state_tx, NegotiationState::Negotiating);
        Ok(())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        *self.state_rx.borrow()
    }

    /// Watch channel mirroring the negotiation state.
    pub fn watch_state(&self) -> watch::Receiver<NegotiationState> {
        self.state_tx.subscribe()
    }

    /// The error that pushed the session to Failed, when one did.
    pub fn last_error(&self) -> Option<CallError> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }

    /// Swap the outgoing track of `kind` for a new capture without
    /// renegotiating. The track of the other kind keeps flowing.
    pub async fn replace_track(&self, kind: MediaKind, track: &LocalTrack) -> Result<()> {
        if self.state().is_terminal() {
            return Err(CallError::SessionClosed);
        }
        self.transport.replace_track(kind, track).await
    }

    /// Tear the session down. Idempotent; safe to call from any state.
    pub async fn close(&self) {
        if self.state() == NegotiationState::Closed {
            return;
        }
        Self::transition(&self.state_tx, NegotiationState::Closed);
        if let Err(err) = self.transport.close().await {
            warn!(error = %err, "transport close failed");
        }
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    fn transition(state_tx: &watch::Sender<NegotiationState>, to: NegotiationState) {
        let current = *state_tx.borrow();
        if current == to {
            return;
        }
        if !current.can_transition_to(&to) {
            debug!(from = ?current, to = ?to, "ignoring invalid state transition");
            return;
        }
        info!(from = ?current, to = ?to, "negotiation state changed");
        state_tx.send_replace(to);
    }
}

/// Owns the inbox and applies events one at a time.
struct NegotiationDriver {
    role: Role,
    transport: Arc<dyn PeerTransport>,
    signaling: Arc<SignalingChannel>,
    state_tx: Arc<watch::Sender<NegotiationState>>,
    inbox: mpsc::Receiver<SessionEvent>,
    failure: Arc<StdMutex<Option<CallError>>>,
    remote_applied: bool,
    restart_attempted: bool,
}

impl NegotiationDriver {
    async fn run(mut self) {
        while let Some(event) = self.inbox.recv().await {
            if *self.state_tx.borrow() == NegotiationState::Closed {
                break;
            }
            match event {
                SessionEvent::RemoteDescription(desc) => self.on_remote_description(desc).await,
                SessionEvent::RemoteCandidate(candidate) => {
                    if let Err(err) = self.transport.add_remote_candidate(&candidate).await {
                        warn!(error = %err, "failed to apply remote candidate");
                    }
                }
                SessionEvent::LocalCandidate(candidate) => {
                    // fire-and-forget: a lost candidate degrades path
                    // choice, not correctness
                    if let Err(err) = self.signaling.publish_candidate(self.role, &candidate).await
                    {
                        warn!(error = %err, "failed to publish local candidate");
                    }
                }
                SessionEvent::TransportState(state) => {
                    if self.on_transport_state(state).await {
                        break;
                    }
                }
            }
        }
        debug!(role = ?self.role, "negotiation event loop ended");
    }

    async fn on_remote_description(&mut self, desc: SessionDescription) {
        if self.remote_applied {
            debug!("remote description already applied, ignoring republish");
            return;
        }
        let expected = match self.role {
            Role::Initiator => DescriptionKind::Answer,
            Role::Receiver => DescriptionKind::Offer,
        };
        if desc.kind != expected {
            warn!(kind = ?desc.kind, expected = ?expected, "unexpected description kind");
            return;
        }

        let outcome = match self.role {
            Role::Receiver => self.answer_offer(desc).await,
            Role::Initiator => self.apply_answer(desc).await,
        };
        if let Err(err) = outcome {
            error!(error = %err, "negotiation failed");
            self.record_failure(err);
            SessionNegotiator::transition(&self.state_tx, NegotiationState::Failed);
        }
    }

    /// Keep the first failure; later ones are consequences of it.
    fn record_failure(&self, err: CallError) {
        if let Ok(mut slot) = self.failure.lock() {
            slot.get_or_insert(err);
        }
    }

    async fn answer_offer(&mut self, offer: SessionDescription) -> Result<()> {
        info!("received offer, answering");
        self.transport.set_remote_description(&offer).await?;
        self.remote_applied = true;
        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(&answer).await?;
        self.signaling
            .publish_description(self.role, &answer)
            .await?;
        SessionNegotiator::transition(&self.state_tx, NegotiationState::Negotiating);
        Ok(())
    }

    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<()> {
        info!("received answer");
        self.transport.set_remote_description(&answer).await?;
        self.remote_applied = true;
        Ok(())
    }

    /// Returns true when the loop should stop.
    async fn on_transport_state(&mut self, state: TransportState) -> bool {
        match state {
            TransportState::Connected => {
                SessionNegotiator::transition(&self.state_tx, NegotiationState::Connected);
            }
            TransportState::Disconnected => {
                SessionNegotiator::transition(&self.state_tx, NegotiationState::Disconnected);
            }
            TransportState::Failed => {
                if self.restart_attempted {
                    error!("connectivity failed after restart");
                    self.record_failure(CallError::ConnectivityFailed(
                        "connectivity failed after restart".to_string(),
                    ));
                    SessionNegotiator::transition(&self.state_tx, NegotiationState::Failed);
                } else {
                    self.restart_attempted = true;
                    warn!("connectivity failed, restarting path discovery");
                    if let Err(err) = self.transport.restart_ice().await {
                        error!(error = %err, "path restart failed");
                        self.record_failure(err);
                        SessionNegotiator::transition(&self.state_tx, NegotiationState::Failed);
                    }
                }
            }
            TransportState::Closed => {
                SessionNegotiator::transition(&self.state_tx, NegotiationState::Closed);
                return true;
            }
            TransportState::New | TransportState::Connecting => {
                debug!(state = ?state, "transport state");
            }
        }
        false
    }
}

async fn forward_descriptions(mut rx: mpsc::Receiver<String>, tx: mpsc::Sender<SessionEvent>) {
    while let Some(raw) = rx.recv().await {
        match signaling::decode_description(&raw) {
            Ok(desc) => {
                if tx.send(SessionEvent::RemoteDescription(desc)).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!(error = %err, "ignoring malformed remote description"),
        }
    }
}

async fn forward_candidates(mut rx: mpsc::Receiver<String>, tx: mpsc::Sender<SessionEvent>) {
    while let Some(raw) = rx.recv().await {
        match signaling::decode_candidate(&raw) {
            Ok(candidate) => {
                if tx
                    .send(SessionEvent::RemoteCandidate(candidate))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(err) => warn!(error = %err, "ignoring malformed remote candidate"),
        }
    }
}

async fn forward_transport_events(
    mut rx: mpsc::Receiver<TransportEvent>,
    tx: mpsc::Sender<SessionEvent>,
) {
    while let Some(event) = rx.recv().await {
        let event = match event {
            TransportEvent::LocalCandidate(candidate) => SessionEvent::LocalCandidate(candidate),
            TransportEvent::StateChanged(state) => SessionEvent::TransportState(state),
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
}
