// SPDX-License-Identifier: GPL-3.0-only

//! Camera directory
//!
//! Maps camera ids to capture sessions. Each id gets at most one session for
//! the lifetime of the directory; concurrent first requests for an id share a
//! single construction.

use super::converter::{FrameConverter, SoftwareConverter};
use super::session::CaptureSession;
use super::state::CaptureState;
use super::types::CameraParams;
use super::DeviceDirectory;
use crate::errors::DeviceError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OnceCell, watch};
use tracing::{debug, info, warn};

type SessionCell = Arc<OnceCell<Arc<CaptureSession>>>;

/// Registry of known cameras and their memoized sessions
pub struct CameraDirectory {
    devices: Arc<dyn DeviceDirectory>,
    converter: Arc<dyn FrameConverter>,
    /// Known identities, sorted by id
    available: watch::Sender<Vec<CameraParams>>,
    sessions: Mutex<HashMap<String, SessionCell>>,
    sessions_created: AtomicUsize,
}

impl CameraDirectory {
    /// Create a directory over `devices` using the software frame converter
    pub fn new(devices: Arc<dyn DeviceDirectory>) -> Self {
        Self::with_converter(devices, Arc::new(SoftwareConverter))
    }

    pub fn with_converter(
        devices: Arc<dyn DeviceDirectory>,
        converter: Arc<dyn FrameConverter>,
    ) -> Self {
        Self {
            devices,
            converter,
            available: watch::Sender::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
            sessions_created: AtomicUsize::new(0),
        }
    }

    /// Re-query the device directory
    ///
    /// Updates the known identities and the metadata of memoized sessions.
    /// Sessions whose camera disappeared are kept.
    pub async fn refresh(&self) -> Result<Vec<CameraParams>, DeviceError> {
        let mut cameras = self.devices.list_identities().await?;
        cameras.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        cameras.dedup_by(|a, b| a.camera_id == b.camera_id);

        for camera in &cameras {
            if let Some(session) = self.memoized(&camera.camera_id) {
                session.update_camera_params(camera.clone());
            }
        }

        debug!(count = cameras.len(), "Refreshed camera list");
        self.available.send_replace(cameras.clone());
        Ok(cameras)
    }

    /// Identities from the last refresh, sorted by id
    pub fn available_cameras(&self) -> Vec<CameraParams> {
        self.available.borrow().clone()
    }

    pub fn subscribe_available_cameras(&self) -> watch::Receiver<Vec<CameraParams>> {
        self.available.subscribe()
    }

    /// Metadata for `camera_id`, refreshing once if it is not yet known
    pub async fn get_camera_params(&self, camera_id: &str) -> Option<CameraParams> {
        if let Some(params) = self.cached_params(camera_id) {
            return Some(params);
        }
        match self.refresh().await {
            Ok(cameras) => cameras.into_iter().find(|c| c.camera_id == camera_id),
            Err(e) => {
                warn!(camera_id, error = %e, "Failed to query cameras");
                None
            }
        }
    }

    /// The session for `camera_id`, created on first request
    ///
    /// Returns `None` if the device directory does not know the id.
    pub async fn get_camera(&self, camera_id: &str) -> Option<Arc<CaptureSession>> {
        if let Some(session) = self.memoized(camera_id) {
            return Some(session);
        }

        let params = self.get_camera_params(camera_id).await?;
        let cell = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(camera_id.to_string())
            .or_default()
            .clone();

        let session = cell
            .get_or_init(|| async move {
                self.sessions_created.fetch_add(1, Ordering::SeqCst);
                info!(camera_id, "Creating capture session");
                CaptureSession::new(params, self.devices.clone(), self.converter.clone())
            })
            .await;
        Some(session.clone())
    }

    /// Number of sessions constructed so far
    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    /// Stop every memoized session and collect the resulting states
    ///
    /// Sessions are stopped one at a time in known-identity order. Sessions
    /// whose camera is no longer listed follow, ordered by id.
    pub async fn stop_all_cameras(&self) -> Vec<(String, CaptureState)> {
        let mut order: Vec<String> = self
            .available
            .borrow()
            .iter()
            .map(|c| c.camera_id.clone())
            .collect();
        let mut unlisted: Vec<String> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|id| !order.contains(*id))
            .cloned()
            .collect();
        unlisted.sort();
        order.extend(unlisted);

        let mut states = Vec::new();
        for camera_id in order {
            let Some(session) = self.memoized(&camera_id) else {
                continue;
            };
            let state = session.stop().await;
            states.push((camera_id, state));
        }
        info!(stopped = states.len(), "Stopped all cameras");
        states
    }

    fn memoized(&self, camera_id: &str) -> Option<Arc<CaptureSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(camera_id)
            .and_then(|cell| cell.get().cloned())
    }

    fn cached_params(&self, camera_id: &str) -> Option<CameraParams> {
        self.available
            .borrow()
            .iter()
            .find(|c| c.camera_id == camera_id)
            .cloned()
    }
}

impl std::fmt::Debug for CameraDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraDirectory")
            .field("available", &self.available.borrow().len())
            .field("sessions_created", &self.sessions_created())
            .finish()
    }
}
