// SPDX-License-Identifier: GPL-3.0-only

//! Simulated device handle and controls

use super::pattern;
use super::{ControlKind, FrameSourceMode, Shared, VirtualCameraSettings};
use crate::backends::camera::frame_loop::{CaptureLoopController, LoopAction, sleep_unless_stopped};
use crate::backends::camera::{
    DeviceControl, DeviceHandle, FocusOutcome, Resolution, StreamHandle, StreamRequest,
};
use crate::constants::virtual_camera::{DEFAULT_RESOLUTIONS, FRAME_DURATION};
use crate::errors::{ControlError, DeviceError};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// An opened simulated camera
pub(super) struct VirtualDevice {
    settings: VirtualCameraSettings,
    shared: Arc<Shared>,
    control: Arc<VirtualControl>,
    producer: Option<CaptureLoopController>,
    released: bool,
}

impl VirtualDevice {
    pub(super) fn new(settings: VirtualCameraSettings, shared: Arc<Shared>) -> Self {
        let control = Arc::new(VirtualControl::new(&settings));
        Self {
            settings,
            shared,
            control,
            producer: None,
            released: false,
        }
    }

    fn camera_id(&self) -> &str {
        &self.settings.params.camera_id
    }

    fn supported_resolutions(&self) -> Vec<Resolution> {
        if self.settings.params.resolutions.is_empty() {
            DEFAULT_RESOLUTIONS
                .iter()
                .map(|&(w, h)| Resolution::new(w, h))
                .collect()
        } else {
            self.settings.params.resolutions.clone()
        }
    }

    fn frame_interval(&self) -> Duration {
        match self.settings.frame_rate {
            0 => FRAME_DURATION,
            fps => Duration::from_secs(1) / fps,
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.shared.forget_stream(self.camera_id());
        self.shared.close_device(self.camera_id());
    }
}

#[async_trait]
impl DeviceHandle for VirtualDevice {
    async fn bind_stream(&mut self, request: StreamRequest) -> Result<StreamHandle, DeviceError> {
        if self.released {
            return Err(DeviceError::Other(format!(
                "{} was already unbound",
                self.camera_id()
            )));
        }
        let resolution = request.resolution.nearest_in(&self.supported_resolutions());
        let rotation = self.settings.sensor_rotation.then(request.target_rotation);
        let sequence = Arc::new(AtomicU64::new(0));

        self.shared.register_stream(
            self.camera_id(),
            request.sink.clone(),
            request.events,
            rotation,
            sequence.clone(),
        );

        if self.settings.source == FrameSourceMode::Pattern {
            let sink = request.sink;
            let format = self.settings.pixel_format;
            let interval = self.frame_interval();
            let name = format!("virtual-camera-{}", self.camera_id());
            self.producer = Some(CaptureLoopController::start(&name, move |stop| {
                let tick = sequence.fetch_add(1, Ordering::SeqCst);
                let frame = pattern::render(format, resolution.width, resolution.height, tick)
                    .with_rotation(rotation);
                if sink.blocking_submit(frame).is_err() {
                    return LoopAction::Stop;
                }
                if sleep_unless_stopped(stop, interval) {
                    LoopAction::Continue
                } else {
                    LoopAction::Stop
                }
            }));
        }

        info!(
            camera_id = %self.camera_id(),
            %resolution,
            rotation = rotation.degrees(),
            source = ?self.settings.source,
            "Virtual stream bound"
        );
        Ok(StreamHandle { resolution })
    }

    async fn unbind(&mut self) {
        if let Some(mut producer) = self.producer.take() {
            producer.request_stop();
            if let Err(e) = tokio::task::spawn_blocking(move || producer.join()).await {
                debug!(error = %e, "Producer join task failed");
            }
        }
        self.release();
        debug!(camera_id = %self.camera_id(), "Virtual device unbound");
    }

    fn control(&self) -> Arc<dyn DeviceControl> {
        self.control.clone()
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        // Sessions tear down through `unbind`, which joins the producer. A
        // device dropped while bound may have a producer parked on the intake,
        // so it is only told to stop here.
        if let Some(producer) = self.producer.take() {
            producer.detach();
        }
        self.release();
    }
}

/// Control handle that accepts or rejects commands per settings
pub(super) struct VirtualControl {
    camera_id: String,
    rejected: Vec<ControlKind>,
    latency: Duration,
    focus_achievable: bool,
}

impl VirtualControl {
    fn new(settings: &VirtualCameraSettings) -> Self {
        Self {
            camera_id: settings.params.camera_id.clone(),
            rejected: settings.rejected_controls.clone(),
            latency: Duration::from_millis(settings.control_latency_ms),
            focus_achievable: settings.focus_achievable,
        }
    }

    async fn apply(&self, kind: ControlKind) -> Result<(), ControlError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.rejected.contains(&kind) {
            return Err(ControlError::Rejected(format!(
                "{} does not support {:?}",
                self.camera_id, kind
            )));
        }
        debug!(camera_id = %self.camera_id, control = ?kind, "Virtual control applied");
        Ok(())
    }
}

#[async_trait]
impl DeviceControl for VirtualControl {
    async fn set_torch(&self, _enabled: bool) -> Result<(), ControlError> {
        self.apply(ControlKind::Torch).await
    }

    async fn set_zoom_ratio(&self, _ratio: f32) -> Result<(), ControlError> {
        self.apply(ControlKind::ZoomRatio).await
    }

    async fn set_linear_zoom(&self, _linear: f32) -> Result<(), ControlError> {
        self.apply(ControlKind::LinearZoom).await
    }

    async fn set_focus(&self, _x: f32, _y: f32) -> Result<FocusOutcome, ControlError> {
        self.apply(ControlKind::Focus).await?;
        Ok(FocusOutcome {
            focused: self.focus_achievable,
        })
    }

    async fn set_exposure_compensation(&self, _index: i32) -> Result<(), ControlError> {
        self.apply(ControlKind::Exposure).await
    }
}
