// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for device controls through a running session

use camera_vision::backends::camera::{
    CameraDirectory, CaptureSession, ControlValues, SessionConfig,
};
use camera_vision::backends::virtual_camera::{
    ControlKind, VirtualCameraDirectory, VirtualCameraSettings,
};
use std::sync::Arc;
use std::time::Duration;

async fn started(settings: VirtualCameraSettings) -> (CameraDirectory, Arc<CaptureSession>) {
    let camera_id = settings.params.camera_id.clone();
    let devices = VirtualCameraDirectory::new(vec![settings]);
    let directory = CameraDirectory::new(Arc::new(devices));
    let session = directory.get_camera(&camera_id).await.unwrap();
    assert!(session.start(SessionConfig::default()).await.is_started());
    (directory, session)
}

#[tokio::test]
async fn test_rejected_zoom_keeps_cached_value() {
    let (directory, session) =
        started(VirtualCameraSettings::manual("cam0").rejecting(ControlKind::ZoomRatio)).await;
    let controls = session.controls().unwrap();
    let before = controls.values();

    assert!(!controls.set_zoom_ratio(2.0).await);
    assert_eq!(controls.values().zoom_ratio, before.zoom_ratio);
    assert_eq!(controls.values(), before);

    directory.stop_all_cameras().await;
}

#[tokio::test]
async fn test_accepted_controls_update_cache() {
    let (directory, session) = started(VirtualCameraSettings::manual("cam0")).await;
    let controls = session.controls().unwrap();
    let mut values = controls.subscribe();
    assert_eq!(*values.borrow_and_update(), ControlValues::default());

    assert!(controls.set_torch_enabled(true).await);
    assert!(controls.set_zoom_ratio(2.0).await);
    assert!(controls.set_linear_zoom(0.5).await);
    assert!(controls.set_focus_point(0.25, 0.75).await);
    assert!(controls.set_exposure_compensation_index(-2).await);

    assert!(values.has_changed().unwrap());
    let current = *values.borrow_and_update();
    assert!(current.torch_enabled);
    assert_eq!(current.zoom_ratio, 2.0);
    assert_eq!(current.linear_zoom, 0.5);
    assert_eq!(current.focus_point, Some((0.25, 0.75)));
    assert_eq!(current.exposure_compensation_index, -2);

    directory.stop_all_cameras().await;
}

#[tokio::test]
async fn test_unfocused_point_is_failure() {
    let (directory, session) =
        started(VirtualCameraSettings::manual("cam0").with_focus_achievable(false)).await;
    let controls = session.controls().unwrap();

    assert!(!controls.set_focus_point(0.5, 0.5).await);
    assert_eq!(controls.values().focus_point, None);

    directory.stop_all_cameras().await;
}

#[tokio::test]
async fn test_stop_cancels_pending_command() {
    let (_directory, session) = started(
        VirtualCameraSettings::manual("cam0").with_control_latency(Duration::from_secs(30)),
    )
    .await;
    let controls = session.controls().unwrap();

    let pending = tokio::spawn({
        let controls = controls.clone();
        async move { controls.set_torch_enabled(true).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    session.stop().await;
    let applied = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(!applied);
    assert!(!controls.values().torch_enabled);
    assert!(session.controls().is_none());
}

#[tokio::test]
async fn test_each_generation_gets_fresh_controls() {
    let (_directory, session) = started(VirtualCameraSettings::manual("cam0")).await;
    let first = session.controls().unwrap();
    assert!(first.set_zoom_ratio(3.0).await);

    session.stop().await;
    assert!(session.controls().is_none());
    assert!(!first.set_zoom_ratio(1.5).await);

    assert!(session.start(SessionConfig::default()).await.is_started());
    let second = session.controls().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.values(), ControlValues::default());
    session.stop().await;
}
