//! Synthetic capture backend
//!
//! Serves the demo binary and the tests: a fixed device inventory, no
//! hardware, with switches to simulate a refused capture grant, failed
//! enumeration, and unplugged devices.

use crate::domain::media::{
    DeviceRequest, LocalStream, LocalTrack, MediaBackend, MediaDeviceInfo, MediaKind,
    StreamConstraints,
};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::DeviceId;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

pub struct SyntheticMediaBackend {
    devices: Vec<MediaDeviceInfo>,
    deny_permission: AtomicBool,
    fail_enumeration: AtomicBool,
    unavailable: Mutex<HashSet<DeviceId>>,
}

impl Default for SyntheticMediaBackend {
    fn default() -> Self {
        Self::with_devices(vec![
            MediaDeviceInfo {
                id: DeviceId::new("synthetic-cam-0"),
                kind: MediaKind::Video,
                label: "Synthetic Camera 0".to_string(),
            },
            MediaDeviceInfo {
                id: DeviceId::new("synthetic-cam-1"),
                kind: MediaKind::Video,
                label: "Synthetic Camera 1".to_string(),
            },
            MediaDeviceInfo {
                id: DeviceId::new("synthetic-mic-0"),
                kind: MediaKind::Audio,
                label: "Synthetic Microphone 0".to_string(),
            },
            MediaDeviceInfo {
                id: DeviceId::new("synthetic-mic-1"),
                kind: MediaKind::Audio,
                label: "Synthetic Microphone 1".to_string(),
            },
        ])
    }
}

impl SyntheticMediaBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<MediaDeviceInfo>) -> Self {
        Self {
            devices,
            deny_permission: AtomicBool::new(false),
            fail_enumeration: AtomicBool::new(false),
            unavailable: Mutex::new(HashSet::new()),
        }
    }

    /// Simulate the user refusing the capture grant.
    pub fn deny_permission(&self) {
        self.deny_permission.store(true, Ordering::SeqCst);
    }

    /// Simulate device enumeration failing outright.
    pub fn fail_enumeration(&self) {
        self.fail_enumeration.store(true, Ordering::SeqCst);
    }

    /// Simulate a device being unplugged: still enumerated, but
    /// acquisition fails.
    pub fn mark_unavailable(&self, id: DeviceId) {
        if let Ok(mut set) = self.unavailable.lock() {
            set.insert(id);
        }
    }

    fn is_unavailable(&self, id: &DeviceId) -> bool {
        self.unavailable
            .lock()
            .map(|set| set.contains(id))
            .unwrap_or(false)
    }

    fn resolve(&self, kind: MediaKind, request: &DeviceRequest) -> Result<DeviceId> {
        let device = match request {
            DeviceRequest::Any => self
                .devices
                .iter()
                .find(|d| d.kind == kind)
                .map(|d| d.id.clone())
                .ok_or_else(|| {
                    CallError::DeviceUnavailable(format!("no {kind} input device"))
                })?,
            DeviceRequest::Exact(id) => self
                .devices
                .iter()
                .find(|d| d.kind == kind && &d.id == id)
                .map(|d| d.id.clone())
                .ok_or_else(|| {
                    CallError::DeviceUnavailable(format!("unknown {kind} device {id}"))
                })?,
        };
        if self.is_unavailable(&device) {
            return Err(CallError::DeviceUnavailable(format!(
                "{kind} device {device} is unavailable"
            )));
        }
        Ok(device)
    }
}

#[async_trait]
impl MediaBackend for SyntheticMediaBackend {
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(CallError::DeviceUnavailable(
                "device enumeration failed".to_string(),
            ));
        }
        Ok(self.devices.clone())
    }

    async fn acquire(&self, constraints: &StreamConstraints) -> Result<LocalStream> {
        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(CallError::PermissionDenied(
                "capture grant refused".to_string(),
            ));
        }
        if constraints.video.is_none() && constraints.audio.is_none() {
            return Err(CallError::InvalidOperation(
                "empty capture constraints".to_string(),
            ));
        }

        let mut tracks = Vec::new();
        if let Some(request) = &constraints.audio {
            let device = self.resolve(MediaKind::Audio, request)?;
            tracks.push(LocalTrack::new(MediaKind::Audio, device));
        }
        if let Some(request) = &constraints.video {
            let device = self.resolve(MediaKind::Video, request)?;
            tracks.push(LocalTrack::new(MediaKind::Video, device));
        }

        let stream = LocalStream::new(tracks);
        debug!(stream_id = %stream.id(), tracks = stream.tracks().len(), "acquired stream");
        Ok(stream)
    }
}
