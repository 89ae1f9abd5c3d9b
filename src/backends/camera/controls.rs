// SPDX-License-Identifier: GPL-3.0-only

//! Device parameter commands with cached values
//!
//! A [`ControlChannel`] lives for one session generation. Every setter sends
//! one command to the device, waits for the device to confirm or reject it,
//! and reports the outcome as a `bool`. The cached values only change on
//! confirmed success, so observers may see stale values but never values the
//! device refused.
//!
//! Setters racing on the same parameter are not ordered: the last one to
//! succeed wins in the cache.

use super::DeviceControl;
use super::frame_loop::StopListener;
use crate::constants::controls::{DEFAULT_LINEAR_ZOOM, DEFAULT_ZOOM_RATIO};
use crate::errors::ControlError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Last confirmed values of every control
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlValues {
    pub torch_enabled: bool,
    pub zoom_ratio: f32,
    pub linear_zoom: f32,
    /// Normalized `(x, y)` of the last successful focus, if any
    pub focus_point: Option<(f32, f32)>,
    pub exposure_compensation_index: i32,
}

impl Default for ControlValues {
    fn default() -> Self {
        Self {
            torch_enabled: false,
            zoom_ratio: DEFAULT_ZOOM_RATIO,
            linear_zoom: DEFAULT_LINEAR_ZOOM,
            focus_point: None,
            exposure_compensation_index: 0,
        }
    }
}

/// Async control commands for one camera generation
pub struct ControlChannel {
    camera_id: String,
    control: Arc<dyn DeviceControl>,
    values: watch::Sender<ControlValues>,
    stop: StopListener,
}

impl ControlChannel {
    pub(crate) fn new(
        camera_id: &str,
        control: Arc<dyn DeviceControl>,
        stop: StopListener,
    ) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            control,
            values: watch::Sender::new(ControlValues::default()),
            stop,
        }
    }

    /// Live cached values; new receivers see the latest value first
    pub fn subscribe(&self) -> watch::Receiver<ControlValues> {
        self.values.subscribe()
    }

    pub fn values(&self) -> ControlValues {
        *self.values.borrow()
    }

    pub async fn set_torch_enabled(&self, enabled: bool) -> bool {
        let result = self.run("torch", self.control.set_torch(enabled)).await;
        self.commit(result, |v| v.torch_enabled = enabled)
    }

    pub async fn set_zoom_ratio(&self, zoom_ratio: f32) -> bool {
        if !(zoom_ratio.is_finite() && zoom_ratio > 0.0) {
            return self.reject("zoom-ratio", zoom_ratio);
        }
        let result = self
            .run("zoom-ratio", self.control.set_zoom_ratio(zoom_ratio))
            .await;
        self.commit(result, |v| v.zoom_ratio = zoom_ratio)
    }

    pub async fn set_linear_zoom(&self, linear_zoom: f32) -> bool {
        if !(0.0..=1.0).contains(&linear_zoom) {
            return self.reject("linear-zoom", linear_zoom);
        }
        let result = self
            .run("linear-zoom", self.control.set_linear_zoom(linear_zoom))
            .await;
        self.commit(result, |v| v.linear_zoom = linear_zoom)
    }

    /// Focus at a normalized point; `true` only if the device reports focus
    pub async fn set_focus_point(&self, x: f32, y: f32) -> bool {
        if !(0.0..=1.0).contains(&x) {
            return self.reject("focus-x", x);
        }
        if !(0.0..=1.0).contains(&y) {
            return self.reject("focus-y", y);
        }
        let result = match self.run("focus", self.control.set_focus(x, y)).await {
            Ok(outcome) if outcome.focused => Ok(()),
            Ok(_) => Err(ControlError::Rejected("focus not achieved".to_string())),
            Err(e) => Err(e),
        };
        self.commit(result, |v| v.focus_point = Some((x, y)))
    }

    pub async fn set_exposure_compensation_index(&self, value: i32) -> bool {
        let result = self
            .run("exposure", self.control.set_exposure_compensation(value))
            .await;
        self.commit(result, |v| v.exposure_compensation_index = value)
    }

    /// Await a device command unless the generation ends first
    async fn run<T>(
        &self,
        name: &'static str,
        command: impl Future<Output = Result<T, ControlError>>,
    ) -> Result<T, ControlError> {
        if self.stop.is_stopped() {
            return Err(ControlError::Cancelled);
        }
        debug!(camera_id = %self.camera_id, control = name, "Submitting control command");
        tokio::select! {
            biased;
            _ = self.stop.stopped() => Err(ControlError::Cancelled),
            result = command => result,
        }
    }

    fn commit(
        &self,
        result: Result<(), ControlError>,
        apply: impl FnOnce(&mut ControlValues),
    ) -> bool {
        match result {
            Ok(()) => {
                self.values.send_modify(apply);
                true
            }
            Err(e) => {
                debug!(camera_id = %self.camera_id, error = %e, "Control command failed");
                false
            }
        }
    }

    fn reject(&self, control: &'static str, value: f32) -> bool {
        warn!(camera_id = %self.camera_id, control, value, "Control value out of range");
        false
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("camera_id", &self.camera_id)
            .field("values", &self.values())
            .finish()
    }
}
