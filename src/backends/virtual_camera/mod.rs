// SPDX-License-Identifier: GPL-3.0-only

//! Simulated camera devices
//!
//! [`VirtualCameraDirectory`] implements [`DeviceDirectory`] without hardware.
//! Each camera is described by [`VirtualCameraSettings`] and either streams a
//! scrolling colour-bar pattern from a capture-loop thread or waits for frames
//! pushed through a [`VirtualFeeder`].
//!
//! # Architecture
//!
//! ```text
//! VirtualCameraDirectory ──open──▶ VirtualDevice ──bind──▶ pattern thread
//!        │                              │                       │
//!        │ feeder() / inject_fault()    │ control()             ▼
//!        └──────────────────────────────┴──────────────────▶ FrameSink
//! ```
//!
//! The directory also simulates the platform conditions a real backend can
//! hit: denied camera permission, a device that is already open, faults while
//! streaming and controls the hardware refuses.

mod device;
mod pattern;

pub use pattern::render as render_pattern;

use crate::backends::camera::{
    CameraParams, DeviceDirectory, DeviceEvent, DeviceHandle, Facing, FrameSink, IntakeClosed,
    PixelFormat, RawFrame, Resolution, Rotation,
};
use crate::errors::DeviceError;
use async_trait::async_trait;
use device::VirtualDevice;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Controls a simulated camera can be told to refuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlKind {
    Torch,
    ZoomRatio,
    LinearZoom,
    Focus,
    Exposure,
}

/// Where a simulated camera's frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSourceMode {
    /// Colour bars generated at the configured frame rate
    #[default]
    Pattern,
    /// Only frames pushed through a [`VirtualFeeder`]
    Manual,
}

fn default_frame_rate() -> u32 {
    30
}

fn default_pixel_format() -> PixelFormat {
    PixelFormat::Yuyv
}

fn default_true() -> bool {
    true
}

/// Description of one simulated camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualCameraSettings {
    pub params: CameraParams,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,
    /// Mounting rotation of the sensor
    #[serde(default)]
    pub sensor_rotation: Rotation,
    #[serde(default)]
    pub source: FrameSourceMode,
    #[serde(default)]
    pub rejected_controls: Vec<ControlKind>,
    /// Delay before each control command completes
    #[serde(default)]
    pub control_latency_ms: u64,
    /// Whether focus commands report the point as focused
    #[serde(default = "default_true")]
    pub focus_achievable: bool,
}

impl VirtualCameraSettings {
    pub fn new(params: CameraParams) -> Self {
        Self {
            params,
            frame_rate: default_frame_rate(),
            pixel_format: default_pixel_format(),
            sensor_rotation: Rotation::Degrees0,
            source: FrameSourceMode::Pattern,
            rejected_controls: Vec::new(),
            control_latency_ms: 0,
            focus_achievable: true,
        }
    }

    /// Manually fed camera; handy for deterministic tests
    pub fn manual(camera_id: &str) -> Self {
        Self::new(CameraParams::new(camera_id)).with_source(FrameSourceMode::Manual)
    }

    pub fn with_source(mut self, source: FrameSourceMode) -> Self {
        self.source = source;
        self
    }

    pub fn with_pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_sensor_rotation(mut self, rotation: Rotation) -> Self {
        self.sensor_rotation = rotation;
        self
    }

    pub fn rejecting(mut self, control: ControlKind) -> Self {
        self.rejected_controls.push(control);
        self
    }

    pub fn with_control_latency(mut self, latency: Duration) -> Self {
        self.control_latency_ms = latency.as_millis() as u64;
        self
    }

    pub fn with_focus_achievable(mut self, achievable: bool) -> Self {
        self.focus_achievable = achievable;
        self
    }
}

/// Built-in pair of simulated cameras: a rear and a front camera
pub fn default_cameras() -> Vec<VirtualCameraSettings> {
    let rear = CameraParams {
        display_name: Some("Virtual Rear Camera".into()),
        facing: Some(Facing::Back),
        resolutions: vec![Resolution::new(640, 480), Resolution::new(1280, 720)],
        hardware_info: Some("VIRTUAL".into()),
        ..CameraParams::new("virtual0")
    };
    let front = CameraParams {
        display_name: Some("Virtual Front Camera".into()),
        facing: Some(Facing::Front),
        resolutions: vec![Resolution::new(640, 480)],
        hardware_info: Some("VIRTUAL".into()),
        ..CameraParams::new("virtual1")
    };
    vec![
        VirtualCameraSettings::new(rear),
        VirtualCameraSettings::new(front).with_sensor_rotation(Rotation::Degrees270),
    ]
}

/// A bound stream as seen from outside the session
struct LiveStream {
    sink: FrameSink,
    events: mpsc::UnboundedSender<DeviceEvent>,
    rotation: Rotation,
    sequence: Arc<AtomicU64>,
}

pub(crate) struct Shared {
    cameras: Mutex<Vec<VirtualCameraSettings>>,
    permission_granted: AtomicBool,
    open: Mutex<HashSet<String>>,
    streams: Mutex<HashMap<String, LiveStream>>,
    devices_opened: AtomicUsize,
    identity_queries: AtomicUsize,
}

impl Shared {
    fn register_stream(
        &self,
        camera_id: &str,
        sink: FrameSink,
        events: mpsc::UnboundedSender<DeviceEvent>,
        rotation: Rotation,
        sequence: Arc<AtomicU64>,
    ) {
        let stream = LiveStream {
            sink,
            events,
            rotation,
            sequence,
        };
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(camera_id.to_string(), stream);
    }

    fn forget_stream(&self, camera_id: &str) {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(camera_id);
    }

    fn close_device(&self, camera_id: &str) {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(camera_id);
    }
}

/// Device directory backed by simulated cameras
///
/// Cloning yields another handle to the same simulated platform.
#[derive(Clone)]
pub struct VirtualCameraDirectory {
    shared: Arc<Shared>,
}

impl VirtualCameraDirectory {
    pub fn new(cameras: Vec<VirtualCameraSettings>) -> Self {
        Self {
            shared: Arc::new(Shared {
                cameras: Mutex::new(cameras),
                permission_granted: AtomicBool::new(true),
                open: Mutex::new(HashSet::new()),
                streams: Mutex::new(HashMap::new()),
                devices_opened: AtomicUsize::new(0),
                identity_queries: AtomicUsize::new(0),
            }),
        }
    }

    pub fn add_camera(&self, settings: VirtualCameraSettings) {
        info!(camera_id = %settings.params.camera_id, "Adding virtual camera");
        let mut cameras = self
            .shared
            .cameras
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cameras.retain(|c| c.params.camera_id != settings.params.camera_id);
        cameras.push(settings);
    }

    pub fn remove_camera(&self, camera_id: &str) -> bool {
        let mut cameras = self
            .shared
            .cameras
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = cameras.len();
        cameras.retain(|c| c.params.camera_id != camera_id);
        before != cameras.len()
    }

    /// Simulate the user granting or revoking camera access
    pub fn set_permission_granted(&self, granted: bool) {
        self.shared
            .permission_granted
            .store(granted, Ordering::SeqCst);
    }

    /// Number of successful `open_device` calls
    pub fn devices_opened(&self) -> usize {
        self.shared.devices_opened.load(Ordering::SeqCst)
    }

    /// Number of `list_identities` calls
    pub fn identity_queries(&self) -> usize {
        self.shared.identity_queries.load(Ordering::SeqCst)
    }

    /// Whether `camera_id` currently has a bound stream
    pub fn is_streaming(&self, camera_id: &str) -> bool {
        self.shared
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(camera_id)
    }

    /// Frame feeder for the stream currently bound on `camera_id`
    pub fn feeder(&self, camera_id: &str) -> Option<VirtualFeeder> {
        let streams = self
            .shared
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        streams.get(camera_id).map(|stream| VirtualFeeder {
            sink: stream.sink.clone(),
            rotation: stream.rotation,
            sequence: stream.sequence.clone(),
        })
    }

    /// Report a device fault on the bound stream
    ///
    /// Returns `false` if `camera_id` is not streaming.
    pub fn inject_fault(&self, camera_id: &str, message: &str) -> bool {
        warn!(camera_id, reason = message, "Injecting virtual device fault");
        self.send_event(camera_id, DeviceEvent::Fault(message.to_string()))
    }

    /// Simulate the camera being unplugged while streaming
    pub fn disconnect(&self, camera_id: &str) -> bool {
        self.send_event(camera_id, DeviceEvent::Disconnected)
    }

    fn send_event(&self, camera_id: &str, event: DeviceEvent) -> bool {
        self.shared
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(camera_id)
            .is_some_and(|stream| stream.events.send(event).is_ok())
    }

    fn settings(&self, camera_id: &str) -> Option<VirtualCameraSettings> {
        self.shared
            .cameras
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|c| c.params.camera_id == camera_id)
            .cloned()
    }
}

impl Default for VirtualCameraDirectory {
    fn default() -> Self {
        Self::new(default_cameras())
    }
}

#[async_trait]
impl DeviceDirectory for VirtualCameraDirectory {
    async fn list_identities(&self) -> Result<Vec<CameraParams>, DeviceError> {
        self.shared.identity_queries.fetch_add(1, Ordering::SeqCst);
        let cameras = self
            .shared
            .cameras
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| c.params.clone())
            .collect();
        Ok(cameras)
    }

    async fn open_device(&self, camera_id: &str) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        if !self.shared.permission_granted.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied);
        }
        let settings = self
            .settings(camera_id)
            .ok_or_else(|| DeviceError::NotFound(camera_id.to_string()))?;

        if !self
            .shared
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(camera_id.to_string())
        {
            return Err(DeviceError::DeviceBusy(camera_id.to_string()));
        }

        self.shared.devices_opened.fetch_add(1, Ordering::SeqCst);
        debug!(camera_id, "Virtual device opened");
        Ok(Box::new(VirtualDevice::new(settings, self.shared.clone())))
    }
}

/// Pushes frames into a manually fed stream
///
/// Frames get the stream's rotation hint and the next sequence number.
#[derive(Clone)]
pub struct VirtualFeeder {
    sink: FrameSink,
    rotation: Rotation,
    sequence: Arc<AtomicU64>,
}

impl VirtualFeeder {
    /// Submit one frame, following the session's backpressure strategy
    pub async fn feed(&self, frame: RawFrame) -> Result<(), IntakeClosed> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.sink
            .submit(frame.with_rotation(self.rotation).with_sequence(sequence))
            .await
    }

    /// Submit the next pattern frame in `format`
    pub async fn feed_pattern(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<(), IntakeClosed> {
        let tick = self.sequence.load(Ordering::SeqCst);
        self.feed(pattern::render(format, width, height, tick)).await
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{StreamRequest, intake};
    use crate::backends::camera::BackpressureStrategy;

    fn request(resolution: Resolution) -> (StreamRequest, intake::FrameSource) {
        let (sink, source) = intake::channel(BackpressureStrategy::KeepOnlyLatest);
        let (events, _rx) = mpsc::unbounded_channel();
        let request = StreamRequest {
            resolution,
            target_rotation: Rotation::Degrees90,
            sink,
            events,
        };
        (request, source)
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let directory = VirtualCameraDirectory::default();
        directory.set_permission_granted(false);
        let result = directory.open_device("virtual0").await;
        assert!(matches!(result, Err(DeviceError::PermissionDenied)));
        assert_eq!(directory.devices_opened(), 0);
    }

    #[tokio::test]
    async fn test_second_open_is_busy_until_unbind() {
        let directory = VirtualCameraDirectory::new(vec![VirtualCameraSettings::manual("cam0")]);
        let mut first = directory.open_device("cam0").await.unwrap();
        assert!(matches!(
            directory.open_device("cam0").await,
            Err(DeviceError::DeviceBusy(_))
        ));
        first.unbind().await;
        assert!(directory.open_device("cam0").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_camera() {
        let directory = VirtualCameraDirectory::default();
        assert!(matches!(
            directory.open_device("nope").await,
            Err(DeviceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_picks_nearest_resolution_and_composes_rotation() {
        let directory = VirtualCameraDirectory::new(vec![
            VirtualCameraSettings::manual("cam0").with_sensor_rotation(Rotation::Degrees90),
        ]);
        let mut device = directory.open_device("cam0").await.unwrap();
        let (request, source) = request(Resolution::new(1300, 700));
        let bound = device.bind_stream(request).await.unwrap();
        assert_eq!(bound.resolution, Resolution::new(1280, 720));

        let feeder = directory.feeder("cam0").unwrap();
        feeder
            .feed(RawFrame::new(2, 2, PixelFormat::Gray8, vec![0u8; 4]))
            .await
            .unwrap();
        let frame = source.next().await.unwrap();
        assert_eq!(frame.frame.rotation, Rotation::Degrees180);
        assert_eq!(frame.frame.sequence, 0);

        device.unbind().await;
        assert!(!directory.is_streaming("cam0"));
        assert!(directory.feeder("cam0").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pattern_source_streams_frames() {
        let settings = VirtualCameraSettings::new(CameraParams::new("cam0"))
            .with_pixel_format(PixelFormat::Rgba)
            .with_frame_rate(200);
        let directory = VirtualCameraDirectory::new(vec![settings]);
        let mut device = directory.open_device("cam0").await.unwrap();
        let (request, source) = request(Resolution::new(640, 480));
        device.bind_stream(request).await.unwrap();

        let first = source.next().await.unwrap();
        assert_eq!(first.frame.width, 640);
        assert_eq!(first.frame.format, PixelFormat::Rgba);
        drop(first);

        device.unbind().await;
        assert!(!directory.is_streaming("cam0"));
    }

    #[tokio::test]
    async fn test_rejected_control() {
        let directory = VirtualCameraDirectory::new(vec![
            VirtualCameraSettings::manual("cam0").rejecting(ControlKind::ZoomRatio),
        ]);
        let device = directory.open_device("cam0").await.unwrap();
        let control = device.control();
        assert!(control.set_zoom_ratio(2.0).await.is_err());
        assert!(control.set_torch(true).await.is_ok());
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let json = r#"{ "params": { "camera_id": "cam9" }, "rejected_controls": ["zoom-ratio"] }"#;
        let settings: VirtualCameraSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.frame_rate, 30);
        assert_eq!(settings.source, FrameSourceMode::Pattern);
        assert_eq!(settings.rejected_controls, vec![ControlKind::ZoomRatio]);
        assert!(settings.focus_achievable);
    }
}
