//! Device manager: capture lifecycle over the backend port
//!
//! Owns the one active local stream. Enumeration is best-effort: a
//! backend that cannot list devices yields empty lists rather than an
//! error, since the call can still proceed with default devices.

use crate::domain::media::{
    DeviceLists, DeviceRequest, LocalStream, LocalTrack, MediaBackend, MediaKind,
    StreamConstraints,
};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{DeviceId, StreamId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Default)]
struct DeviceState {
    /// A capture grant was obtained at least once; labels are complete
    granted: bool,
    current: Option<LocalStream>,
}

pub struct DeviceManager {
    backend: Arc<dyn MediaBackend>,
    state: Mutex<DeviceState>,
}

impl DeviceManager {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Enumerate capture devices, split by kind.
    ///
    /// Obtains a short-lived capture grant first when none was obtained
    /// yet, so labels come back unredacted. Never fails: an enumeration
    /// error is logged and yields empty lists.
    pub async fn list_devices(&self) -> DeviceLists {
        self.ensure_grant().await;
        match self.backend.enumerate_devices().await {
            Ok(devices) => DeviceLists::partition(devices),
            Err(err) => {
                warn!(error = %err, "device enumeration failed");
                DeviceLists::default()
            }
        }
    }

    async fn ensure_grant(&self) {
        let mut state = self.state.lock().await;
        if state.granted {
            return;
        }
        match self.backend.acquire(&StreamConstraints::audio_video()).await {
            Ok(probe) => {
                probe.stop_all();
                state.granted = true;
            }
            Err(err) => {
                warn!(error = %err, "capture grant probe failed, labels may be redacted");
            }
        }
    }

    /// Acquire a fresh stream, releasing any previous one first.
    pub async fn acquire_stream(&self, constraints: &StreamConstraints) -> Result<LocalStream> {
        let mut state = self.state.lock().await;
        if let Some(old) = state.current.take() {
            old.stop_all();
        }
        let stream = self.backend.acquire(constraints).await?;
        state.granted = true;
        state.current = Some(stream.clone());
        info!(stream_id = %stream.id(), tracks = stream.tracks().len(), "acquired local stream");
        Ok(stream)
    }

    /// Stop and drop the active stream. Idempotent.
    pub async fn release_stream(&self) {
        let mut state = self.state.lock().await;
        match state.current.take() {
            Some(stream) => {
                stream.stop_all();
                debug!(stream_id = %stream.id(), "released local stream");
            }
            None => debug!("release with no active stream"),
        }
    }

    /// Release the active stream only if it is still the given one.
    ///
    /// Used by a superseded call attempt to clean up the stream it
    /// acquired without touching one a newer attempt owns.
    pub async fn release_if_current(&self, id: StreamId) {
        let mut state = self.state.lock().await;
        if state.current.as_ref().map(LocalStream::id) != Some(id) {
            return;
        }
        if let Some(stream) = state.current.take() {
            stream.stop_all();
            debug!(stream_id = %stream.id(), "released superseded stream");
        }
    }

    pub async fn current_stream(&self) -> Option<LocalStream> {
        self.state.lock().await.current.clone()
    }

    /// Swap the active stream's track of `kind` to a specific device.
    ///
    /// The old track is stopped only after the new one is live, and the
    /// track of the other kind is left untouched. Returns the new track
    /// so the caller can splice it into the transport.
    pub async fn swap_device(&self, kind: MediaKind, device: DeviceId) -> Result<LocalTrack> {
        let mut state = self.state.lock().await;
        let current = state.current.as_mut().ok_or_else(|| {
            CallError::InvalidOperation("no active stream to swap a device on".to_string())
        })?;

        let constraints = StreamConstraints::single(kind, DeviceRequest::Exact(device));
        let acquired = self.backend.acquire(&constraints).await?;
        let new_track = acquired.track(kind).cloned().ok_or_else(|| {
            CallError::DeviceUnavailable(format!("backend returned no {kind} track"))
        })?;

        if let Some(old) = current.replace_track(new_track.clone()) {
            old.stop();
        }
        info!(kind = %kind, device = %new_track.device(), "swapped capture device");
        Ok(new_track)
    }
}
