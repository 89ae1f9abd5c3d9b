// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Running a camera with the built-in processors
//! - Writing a starting configuration file

use camera_vision::backends::camera::{
    BackpressureStrategy, CameraDirectory, CaptureSession, CaptureState, ControlChannel,
};
use camera_vision::backends::virtual_camera::VirtualCameraDirectory;
use camera_vision::config::Config;
use camera_vision::constants::timing::STATS_INTERVAL;
use camera_vision::constants::{ResolutionPreset, get_resolution_label};
use camera_vision::errors::{AppError, AppResult};
use camera_vision::frame_processor::{LumaStats, Processor, QrDetector};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Options of the `run` command
pub struct RunOptions {
    pub camera: Option<String>,
    pub duration: u64,
    pub resolution: Option<String>,
    pub block_producer: bool,
    pub overlay: bool,
    pub controls: Vec<String>,
}

fn camera_directory(config: &Config) -> CameraDirectory {
    let devices = VirtualCameraDirectory::new(config.virtual_cameras.clone());
    CameraDirectory::new(Arc::new(devices))
}

/// List all available cameras
pub async fn list_cameras(config: &Config) -> AppResult<()> {
    let directory = camera_directory(config);
    let cameras = directory
        .refresh()
        .await
        .map_err(|e| AppError::Other(format!("Failed to list cameras: {}", e)))?;

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for camera in &cameras {
        println!("  [{}] {}", camera.camera_id, camera.label());
        if let Some(facing) = camera.facing {
            println!("      Facing: {}", facing);
        }
        if !camera.resolutions.is_empty() {
            let res_strs: Vec<String> = camera
                .resolutions
                .iter()
                .map(|r| match get_resolution_label(r.width) {
                    Some(label) => format!("{} ({})", r, label),
                    None => r.to_string(),
                })
                .collect();
            println!("      Resolutions: {}", res_strs.join(", "));
        }
        if let Some(info) = &camera.hardware_info {
            println!("      Hardware: {}", info);
        }
        println!();
    }

    Ok(())
}

/// Run a camera for a while, printing what the processors see
pub async fn run_camera(config: &Config, options: RunOptions) -> AppResult<()> {
    let directory = camera_directory(config);
    let cameras = directory
        .refresh()
        .await
        .map_err(|e| AppError::Other(format!("Failed to list cameras: {}", e)))?;

    let camera_id = options
        .camera
        .or_else(|| config.default_camera.clone())
        .or_else(|| cameras.first().map(|c| c.camera_id.clone()))
        .ok_or("No cameras found")?;
    let session = directory
        .get_camera(&camera_id)
        .await
        .ok_or_else(|| AppError::Other(format!("Unknown camera: {}", camera_id)))?;

    let luma = Processor::new(LumaStats::default());
    let qr = Processor::new(QrDetector::new());
    let mut session_config = config.session_config([luma.erase(), qr.erase()]);
    if let Some(name) = options.resolution.as_deref() {
        let preset = ResolutionPreset::from_name(name)
            .ok_or_else(|| AppError::Config(format!("Unknown resolution preset: {}", name)))?;
        session_config.resolution = preset.resolution();
    }
    if options.block_producer {
        session_config.backpressure = BackpressureStrategy::BlockProducer;
    }

    let mut snapshot_config = config.snapshot;
    snapshot_config.visualisation_enabled |= options.overlay;
    session.set_snapshot_config(snapshot_config);

    match session.start(session_config).await {
        CaptureState::Started(started) => println!(
            "Camera {} started at {} ({})",
            camera_id, started.resolution, started.backpressure
        ),
        other => {
            let reason = other
                .error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| other.to_string());
            return Err(AppError::Other(format!(
                "Failed to start {}: {}",
                camera_id, reason
            )));
        }
    }

    if let Some(channel) = session.controls() {
        for command in &options.controls {
            let applied = apply_control(&channel, command).await?;
            println!(
                "Control {}: {}",
                command,
                if applied { "applied" } else { "rejected" }
            );
        }
    }

    watch_session(&session, &luma, &qr, Duration::from_secs(options.duration)).await;

    for (id, state) in directory.stop_all_cameras().await {
        println!("Camera {}: {}", id, state);
    }
    Ok(())
}

/// Print progress until `duration` passes, Ctrl+C, or the session fails
async fn watch_session(
    session: &CaptureSession,
    luma: &Processor<LumaStats>,
    qr: &Processor<QrDetector>,
    duration: Duration,
) {
    let deadline = tokio::time::sleep(duration);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(deadline, ctrl_c);
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    let mut states = session.subscribe_state();

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = &mut ctrl_c => {
                println!("Interrupted");
                break;
            }
            _ = ticker.tick() => print_progress(session, luma, qr),
            changed = states.changed() => {
                let state = states.borrow_and_update().clone();
                if changed.is_err() || !state.is_started() {
                    println!("Camera left started state: {}", state);
                    break;
                }
            }
        }
    }
}

fn print_progress(
    session: &CaptureSession,
    luma: &Processor<LumaStats>,
    qr: &Processor<QrDetector>,
) {
    let stats = session.stats();
    let Some(snapshot) = session.snapshot() else {
        println!(
            "frames: {} received, {} dropped (no snapshot yet)",
            stats.frames_received, stats.frames_dropped
        );
        return;
    };

    let luma_text = snapshot
        .results
        .get(luma)
        .map(|s| format!("mean {:.1} [{}..{}]", s.mean, s.min, s.max))
        .unwrap_or_else(|| "n/a".to_string());
    let codes: Vec<&str> = snapshot
        .results
        .get(qr)
        .map(|found| found.iter().map(|d| d.content.as_str()).collect())
        .unwrap_or_default();

    println!(
        "#{} frames: {} received, {} dropped, {} published | {:?} | luma {} | qr {:?}",
        snapshot.sequence,
        stats.frames_received,
        stats.frames_dropped,
        stats.snapshots_published,
        stats.last_processing_duration,
        luma_text,
        codes
    );
}

/// Apply one `name=value` control command
async fn apply_control(channel: &ControlChannel, command: &str) -> AppResult<bool> {
    let invalid = || AppError::Config(format!("Invalid control command: {}", command));
    let (name, value) = command.split_once('=').ok_or_else(invalid)?;

    let applied = match name.trim() {
        "torch" => {
            let enabled = match value.trim() {
                "on" | "true" | "1" => true,
                "off" | "false" | "0" => false,
                _ => return Err(invalid()),
            };
            channel.set_torch_enabled(enabled).await
        }
        "zoom" => {
            let ratio = value.trim().parse().map_err(|_| invalid())?;
            channel.set_zoom_ratio(ratio).await
        }
        "linear-zoom" => {
            let linear = value.trim().parse().map_err(|_| invalid())?;
            channel.set_linear_zoom(linear).await
        }
        "focus" => {
            let (x, y) = value.split_once(',').ok_or_else(invalid)?;
            let x = x.trim().parse().map_err(|_| invalid())?;
            let y = y.trim().parse().map_err(|_| invalid())?;
            channel.set_focus_point(x, y).await
        }
        "exposure" => {
            let index = value.trim().parse().map_err(|_| invalid())?;
            channel.set_exposure_compensation_index(index).await
        }
        _ => return Err(invalid()),
    };
    Ok(applied)
}

/// Write `config` to `path` (or the default location)
pub fn write_config(config: &Config, path: Option<PathBuf>, force: bool) -> AppResult<()> {
    let path = path
        .or_else(Config::default_path)
        .ok_or("No config directory on this platform")?;
    if path.exists() && !force {
        return Err(AppError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    config.save(&path)?;
    println!("Config written: {}", path.display());
    Ok(())
}
