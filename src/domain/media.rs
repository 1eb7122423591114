//! Capture port: devices, streams, and tracks
//!
//! The capture backend itself (camera/microphone hardware, platform
//! permission prompts) is a black box behind [`MediaBackend`]. The engine
//! only handles track identities; samples never flow through it.

use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{DeviceId, StreamId, TrackId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kind of a capture track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// A capture device as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDeviceInfo {
    pub id: DeviceId,
    pub kind: MediaKind,
    pub label: String,
}

/// Enumerated capture devices, split by kind
#[derive(Debug, Clone, Default)]
pub struct DeviceLists {
    pub video_inputs: Vec<MediaDeviceInfo>,
    pub audio_inputs: Vec<MediaDeviceInfo>,
}

impl DeviceLists {
    pub fn partition(devices: Vec<MediaDeviceInfo>) -> Self {
        let mut lists = Self::default();
        for device in devices {
            match device.kind {
                MediaKind::Video => lists.video_inputs.push(device),
                MediaKind::Audio => lists.audio_inputs.push(device),
            }
        }
        lists
    }
}

/// Device selection for one track of an acquisition request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceRequest {
    /// Any device of the kind, backend's default
    #[default]
    Any,
    /// Exactly this device
    Exact(DeviceId),
}

/// What to capture. `None` for a kind means the kind is not captured.
#[derive(Debug, Clone, Default)]
pub struct StreamConstraints {
    pub video: Option<DeviceRequest>,
    pub audio: Option<DeviceRequest>,
}

impl StreamConstraints {
    /// Both kinds, default devices
    pub fn audio_video() -> Self {
        Self {
            video: Some(DeviceRequest::Any),
            audio: Some(DeviceRequest::Any),
        }
    }

    /// A single kind with an explicit device selection
    pub fn single(kind: MediaKind, request: DeviceRequest) -> Self {
        match kind {
            MediaKind::Video => Self {
                video: Some(request),
                audio: None,
            },
            MediaKind::Audio => Self {
                video: None,
                audio: Some(request),
            },
        }
    }

    pub fn request(&self, kind: MediaKind) -> Option<&DeviceRequest> {
        match kind {
            MediaKind::Video => self.video.as_ref(),
            MediaKind::Audio => self.audio.as_ref(),
        }
    }
}

/// A live capture track.
///
/// Cloning shares the underlying stop flag; stopping any clone stops the
/// track everywhere it is referenced.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    id: TrackId,
    kind: MediaKind,
    device: DeviceId,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, device: DeviceId) -> Self {
        Self {
            id: TrackId::new(),
            kind,
            device,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Release the underlying capture; idempotent
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// A set of capture tracks acquired together.
///
/// Shared by reference: tracks are attached to the transport, not copied.
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: StreamId,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: StreamId::new(),
            tracks,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: MediaKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Swap in a replacement track of the same kind, returning the one it
    /// displaced. Tracks of the other kind are left untouched.
    pub fn replace_track(&mut self, replacement: LocalTrack) -> Option<LocalTrack> {
        match self
            .tracks
            .iter()
            .position(|t| t.kind() == replacement.kind())
        {
            Some(index) => {
                let old = std::mem::replace(&mut self.tracks[index], replacement);
                Some(old)
            }
            None => {
                self.tracks.push(replacement);
                None
            }
        }
    }

    /// Stop every track; idempotent
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Capture backend port: enumerate devices and acquire streams.
///
/// Implemented by the synthetic backend for tests and the demo; a real
/// deployment binds it to platform capture.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// List capture devices. May fail or return redacted labels when no
    /// capture grant was obtained yet.
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>>;

    /// Acquire a fresh stream satisfying the constraints.
    async fn acquire(&self, constraints: &StreamConstraints) -> Result<LocalStream>;
}
