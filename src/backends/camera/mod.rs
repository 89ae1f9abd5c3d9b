// SPDX-License-Identifier: GPL-3.0-only
// Camera capture with trait-based device abstraction

//! Camera capture sessions and the device seams they run on
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   CameraDirectory   │  ← One memoized session per camera id
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐      ┌────────────────┐
//! │    CaptureSession   │ ───▶ │ ControlChannel │  ← Per generation
//! └──────────┬──────────┘      └────────────────┘
//!            │ FrameSink (backpressure)
//!            ▼
//! ┌─────────────────────┐
//! │  Frame lane         │  ← normalize → fan-out → aggregate → publish
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ DeviceDirectory /   │  ← Platform collaborators (traits below)
//! │ DeviceHandle        │
//! └─────────────────────┘
//! ```

pub mod controls;
pub mod converter;
pub mod directory;
pub mod frame_loop;
pub mod intake;
pub mod pipeline;
pub mod session;
pub mod state;
pub mod types;

pub use controls::{ControlChannel, ControlValues};
pub use converter::{FrameConverter, SoftwareConverter};
pub use directory::CameraDirectory;
pub use intake::{FrameSink, IntakeClosed, IntakeStats};
pub use pipeline::PipelineStats;
pub use session::CaptureSession;
pub use state::CaptureState;
pub use types::*;

use crate::errors::{ControlError, DeviceError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Source of camera identities and device handles
///
/// Supplied by the platform. The core only reads from it.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    // ===== Enumeration =====

    /// Cameras currently known to the platform
    async fn list_identities(&self) -> Result<Vec<CameraParams>, DeviceError>;

    // ===== Lifecycle =====

    /// Open a device for exclusive use by one session
    ///
    /// # Errors
    /// `PermissionDenied`, `NotFound` or `DeviceBusy` when the device cannot
    /// be opened.
    async fn open_device(&self, camera_id: &str) -> Result<Box<dyn DeviceHandle>, DeviceError>;
}

/// Everything a device needs to start streaming
pub struct StreamRequest {
    pub resolution: Resolution,
    pub target_rotation: Rotation,
    /// Where raw frames are pushed
    pub sink: FrameSink,
    /// Where asynchronous device faults are reported
    pub events: mpsc::UnboundedSender<DeviceEvent>,
}

/// A bound stream as confirmed by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHandle {
    /// The resolution actually in use, which may differ from the request
    pub resolution: Resolution,
}

/// Asynchronous notifications from a bound device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device failed and the stream is gone
    Fault(String),
    /// The device was unplugged or taken away
    Disconnected,
}

/// An opened camera device
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Start streaming raw frames into `request.sink`
    async fn bind_stream(&mut self, request: StreamRequest) -> Result<StreamHandle, DeviceError>;

    /// Stop streaming and release the device
    ///
    /// After this returns no more frames reach the sink.
    async fn unbind(&mut self);

    /// Control sub-handle for this device
    fn control(&self) -> Arc<dyn DeviceControl>;
}

/// Result of a focus and metering command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusOutcome {
    /// The device reports the point is in focus
    pub focused: bool,
}

/// Primitive adjustable parameters of a device
///
/// Each command resolves when the device confirms or rejects it. Dropping
/// the returned future cancels the command.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn set_torch(&self, enabled: bool) -> Result<(), ControlError>;

    async fn set_zoom_ratio(&self, ratio: f32) -> Result<(), ControlError>;

    /// Zoom as a fraction between minimum (0.0) and maximum (1.0)
    async fn set_linear_zoom(&self, linear: f32) -> Result<(), ControlError>;

    /// Focus and meter at a normalized point
    async fn set_focus(&self, x: f32, y: f32) -> Result<FocusOutcome, ControlError>;

    async fn set_exposure_compensation(&self, index: i32) -> Result<(), ControlError>;
}
