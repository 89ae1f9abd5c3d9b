// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use crate::backends::camera::types::Resolution;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resolution requested when a configuration does not name one
pub const DEFAULT_RESOLUTION: Resolution = Resolution::new(1280, 720);

/// Named capture resolutions
///
/// Convenience presets for the CLI and configuration. The device may bind a
/// different resolution; the started state always reports the real one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResolutionPreset {
    /// 640x480
    Sd,
    /// 1280x720 (default)
    #[default]
    Hd,
    /// 1920x1080
    FullHd,
    /// 3840x2160
    FourK,
}

impl ResolutionPreset {
    /// Get all preset variants, smallest first
    pub const ALL: [ResolutionPreset; 4] = [
        ResolutionPreset::Sd,
        ResolutionPreset::Hd,
        ResolutionPreset::FullHd,
        ResolutionPreset::FourK,
    ];

    /// Get display name for the preset
    pub fn display_name(&self) -> &'static str {
        match self {
            ResolutionPreset::Sd => "SD",
            ResolutionPreset::Hd => "720p",
            ResolutionPreset::FullHd => "HD",
            ResolutionPreset::FourK => "4K",
        }
    }

    pub fn resolution(&self) -> Resolution {
        match self {
            ResolutionPreset::Sd => Resolution::new(640, 480),
            ResolutionPreset::Hd => Resolution::new(1280, 720),
            ResolutionPreset::FullHd => Resolution::new(1920, 1080),
            ResolutionPreset::FourK => Resolution::new(3840, 2160),
        }
    }

    /// Parse a preset from its display name or a short alias
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sd" | "480p" => Some(ResolutionPreset::Sd),
            "720p" | "hd720" => Some(ResolutionPreset::Hd),
            "hd" | "1080p" | "fullhd" => Some(ResolutionPreset::FullHd),
            "4k" | "2160p" | "uhd" => Some(ResolutionPreset::FourK),
            _ => None,
        }
    }
}

/// Resolution labels for listings
pub fn get_resolution_label(width: u32) -> Option<&'static str> {
    match width {
        w if w >= 3840 => Some("4K"), // 3840x2160
        w if w >= 2560 => Some("2K"), // 2560x1440
        w if w >= 1920 => Some("HD"), // 1920x1080
        w if w >= 1280 => Some("720p"),
        w if w >= 640 => Some("SD"), // 640x480
        _ => None,
    }
}

/// Control value ranges
pub mod controls {
    /// Zoom ratio reported before any zoom command succeeds
    pub const DEFAULT_ZOOM_RATIO: f32 = 1.0;

    /// Linear zoom reported before any zoom command succeeds
    pub const DEFAULT_LINEAR_ZOOM: f32 = 0.0;
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Snapshot counter modulo for periodic logging
    pub const SNAPSHOT_LOG_INTERVAL: u64 = 30;

    /// How often the CLI prints session statistics
    pub const STATS_INTERVAL: Duration = Duration::from_secs(1);
}

/// Simulated camera constants
pub mod virtual_camera {
    use super::Duration;

    /// Frame interval for generated streams (~30fps)
    pub const FRAME_DURATION: Duration = Duration::from_millis(33);

    /// Fallback resolutions for simulated cameras that list none
    pub const DEFAULT_RESOLUTIONS: &[(u32, u32)] = &[(640, 480), (1280, 720), (1920, 1080)];
}

/// Frame processor constants
pub mod processing {
    /// Frames larger than this are downscaled before QR detection
    pub const QR_MAX_DIMENSION: u32 = 640;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_names_round_trip() {
        for preset in ResolutionPreset::ALL {
            assert_eq!(ResolutionPreset::from_name(preset.display_name()), Some(preset));
        }
    }

    #[test]
    fn test_resolution_labels() {
        assert_eq!(get_resolution_label(1920), Some("HD"));
        assert_eq!(get_resolution_label(320), None);
    }
}
