// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use camera_vision::Config;
use camera_vision::backends::camera::{BackpressureStrategy, Resolution, Rotation};
use camera_vision::backends::virtual_camera::ControlKind;
use camera_vision::frame_processor::{LumaStats, Processor};
use std::path::PathBuf;

fn temp_config_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("camera-vision-test-{}", uuid::Uuid::new_v4()))
        .join("config.json")
}

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.default_camera, None);
    assert_eq!(config.stream.backpressure, BackpressureStrategy::KeepOnlyLatest);
    assert!(config.snapshot.camera_view_enabled);
    assert!(
        !config.virtual_cameras.is_empty(),
        "Default config should offer simulated cameras"
    );
}

#[test]
fn test_config_save_and_load() {
    let path = temp_config_path();
    let mut config = Config::default();
    config.default_camera = Some("virtual1".to_string());
    config.stream.resolution = Resolution::new(640, 480);
    config.stream.target_rotation = Rotation::Degrees90;
    config.virtual_cameras[0] = config.virtual_cameras[0]
        .clone()
        .rejecting(ControlKind::Torch);

    config.save(&path).unwrap();
    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, config);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_partial_file_uses_defaults() {
    let path = temp_config_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{ "stream": { "backpressure": "BlockProducer" } }"#).unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.stream.backpressure, BackpressureStrategy::BlockProducer);
    assert_eq!(config.stream.resolution, Resolution::default());
    assert_eq!(config.virtual_cameras, Config::default().virtual_cameras);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_invalid_file_falls_back_to_default() {
    let path = temp_config_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "not json").unwrap();

    assert!(Config::load(&path).is_err());
    assert_eq!(Config::load_or_default(Some(path.as_path())), Config::default());

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_missing_file_is_default() {
    let path = temp_config_path();
    assert_eq!(Config::load_or_default(Some(path.as_path())), Config::default());
}

#[test]
fn test_session_config_from_stream_settings() {
    let mut config = Config::default();
    config.stream.backpressure = BackpressureStrategy::BlockProducer;
    let luma = Processor::new(LumaStats::default());

    let session_config = config.session_config([luma.erase()]);
    assert_eq!(session_config.backpressure, BackpressureStrategy::BlockProducer);
    assert_eq!(session_config.resolution, config.stream.resolution);
    assert_eq!(session_config.processors.len(), 1);
    assert_eq!(session_config.processors[0].id(), luma.id());
}
