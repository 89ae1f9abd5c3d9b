// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::{
    BackpressureStrategy, OutputImageFormat, Resolution, Rotation, SessionConfig, SnapshotConfig,
};
use crate::backends::virtual_camera::{VirtualCameraSettings, default_cameras};
use crate::errors::{AppError, AppResult};
use crate::frame_processor::AnyProcessor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory name under the user's config directory
const CONFIG_DIR_NAME: &str = "camera-vision";

/// Config file name
const CONFIG_FILE_NAME: &str = "config.json";

/// Stream parameters used when starting a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Requested resolution (the device may bind the nearest supported one)
    pub resolution: Resolution,
    pub backpressure: BackpressureStrategy,
    pub target_rotation: Rotation,
    pub output_format: OutputImageFormat,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            backpressure: BackpressureStrategy::default(),
            target_rotation: Rotation::default(),
            output_format: OutputImageFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera used when none is named on the command line
    pub default_camera: Option<String>,
    pub stream: StreamSettings,
    /// What snapshots carry
    pub snapshot: SnapshotConfig,
    /// Simulated cameras offered by the virtual backend
    pub virtual_cameras: Vec<VirtualCameraSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_camera: None,
            stream: StreamSettings::default(),
            snapshot: SnapshotConfig::default(),
            virtual_cameras: default_cameras(),
        }
    }
}

impl Config {
    /// `<config dir>/camera-vision/config.json`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        let config = serde_json::from_str(&text)
            .map_err(|e| AppError::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Load from `path` (or the default path), falling back to defaults
    ///
    /// A missing file is not an error. An unreadable or invalid file is
    /// logged and ignored.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Self::default(),
            },
        };
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            warn!(error = %e, "Using default config");
            Self::default()
        })
    }

    /// Session configuration for the configured stream and `processors`
    pub fn session_config(
        &self,
        processors: impl IntoIterator<Item = AnyProcessor>,
    ) -> SessionConfig {
        SessionConfig {
            resolution: self.stream.resolution,
            backpressure: self.stream.backpressure,
            target_rotation: self.stream.target_rotation,
            output_format: self.stream.output_format,
            processors: processors.into_iter().collect(),
        }
    }
}
