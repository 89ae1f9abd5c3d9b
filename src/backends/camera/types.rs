// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera capture sessions

//! Shared types for camera capture sessions

use crate::frame_processor::{AnyProcessor, ProcessingResults};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pixel buffer shared between the frame source, the pipeline and snapshots
pub type FrameData = Arc<[u8]>;

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixel count
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Pick the supported resolution closest to this one by pixel count.
    ///
    /// Ties go to the earlier entry. Returns `self` when nothing is supported.
    pub fn nearest_in(&self, supported: &[Resolution]) -> Resolution {
        supported
            .iter()
            .copied()
            .min_by_key(|r| r.area().abs_diff(self.area()))
            .unwrap_or(*self)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        crate::constants::DEFAULT_RESOLUTION
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which way a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
    External,
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::Front => write!(f, "front"),
            Facing::Back => write!(f, "back"),
            Facing::External => write!(f, "external"),
        }
    }
}

/// Field of view in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldOfView {
    pub horizontal: f32,
    pub vertical: f32,
}

/// Identity and static characteristics of a camera
///
/// Discovered from the device directory and never mutated afterwards. A
/// refresh of the directory produces new values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    /// Stable identifier used to look the camera up
    pub camera_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub facing: Option<Facing>,
    /// Supported output resolutions, in platform order
    #[serde(default)]
    pub resolutions: Vec<Resolution>,
    #[serde(default)]
    pub field_of_view: Option<FieldOfView>,
    /// Free-form hardware capability level (e.g. "FULL", "LIMITED")
    #[serde(default)]
    pub hardware_info: Option<String>,
}

impl CameraParams {
    /// Params that carry only an identifier
    pub fn new(camera_id: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            display_name: None,
            facing: None,
            resolutions: Vec::new(),
            field_of_view: None,
            hardware_info: None,
        }
    }

    /// Display name, falling back to the identifier
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.camera_id)
    }
}

/// Clockwise rotation in 90 degree steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    #[serde(rename = "0")]
    Degrees0,
    #[serde(rename = "90")]
    Degrees90,
    #[serde(rename = "180")]
    Degrees180,
    #[serde(rename = "270")]
    Degrees270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Degrees0,
        Rotation::Degrees90,
        Rotation::Degrees180,
        Rotation::Degrees270,
    ];

    /// Create rotation from an integer degree value (normalised to 0-360).
    ///
    /// Values that are not a multiple of 90 round down to the previous step.
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) / 90 {
            1 => Rotation::Degrees90,
            2 => Rotation::Degrees180,
            3 => Rotation::Degrees270,
            _ => Rotation::Degrees0,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Degrees0 => 0,
            Rotation::Degrees90 => 90,
            Rotation::Degrees180 => 180,
            Rotation::Degrees270 => 270,
        }
    }

    pub fn radians(&self) -> f32 {
        (self.degrees() as f32).to_radians()
    }

    /// Rotation equal to applying `self` then `other`
    pub fn then(&self, other: Rotation) -> Rotation {
        Rotation::from_degrees((self.degrees() + other.degrees()) as i32)
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Rotation::Degrees90 | Rotation::Degrees270)
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// What the intake does when frames arrive faster than they are processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackpressureStrategy {
    /// Replace the pending frame; the producer never waits
    #[default]
    KeepOnlyLatest,
    /// Block the producer until the in-flight frame has been processed
    BlockProducer,
}

impl std::fmt::Display for BackpressureStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackpressureStrategy::KeepOnlyLatest => write!(f, "keep-only-latest"),
            BackpressureStrategy::BlockProducer => write!(f, "block-producer"),
        }
    }
}

/// Pixel layout delivered to processors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputImageFormat {
    /// 8-bit 4:2:0, NV12 layout (Y plane then interleaved UV plane)
    #[default]
    Yuv420,
    /// 8-bit RGBA, 4 bytes per pixel
    Rgba8888,
}

impl OutputImageFormat {
    /// Tightly packed buffer size for the given dimensions
    pub fn buffer_len(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            OutputImageFormat::Yuv420 => w * h + 2 * w.div_ceil(2) * h.div_ceil(2),
            OutputImageFormat::Rgba8888 => w * h * 4,
        }
    }
}

/// Pixel format of raw frames delivered by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    Rgba,
    /// RGB24 - 24-bit RGB (3 bytes per pixel, no alpha)
    Rgb24,
    /// YUYV - Packed 4:2:2 (Y0 U Y1 V interleaved)
    Yuyv,
    /// NV12 - Semi-planar 4:2:0 (Y plane + interleaved UV plane)
    Nv12,
    /// Gray8 - 8-bit grayscale (single channel)
    Gray8,
}

impl PixelFormat {
    /// Minimum bytes per row for a tightly packed frame
    ///
    /// `None` if the row length does not fit in a `u32`.
    pub fn min_stride(&self, width: u32) -> Option<u32> {
        match self {
            PixelFormat::Rgba => width.checked_mul(4),
            PixelFormat::Rgb24 => width.checked_mul(3),
            PixelFormat::Yuyv => width.div_ceil(2).checked_mul(4),
            PixelFormat::Nv12 | PixelFormat::Gray8 => Some(width),
        }
    }

    /// Bytes required for a frame with the given row stride
    ///
    /// `None` if the size does not fit in a `usize`.
    pub fn frame_len(&self, stride: u32, height: u32) -> Option<usize> {
        let (s, h) = (stride as usize, height as usize);
        let luma = s.checked_mul(h)?;
        match self {
            PixelFormat::Nv12 => luma.checked_add(s.checked_mul(h.div_ceil(2))?),
            _ => Some(luma),
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PixelFormat::Rgba => "RGBA",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Gray8 => "GRAY8",
        };
        write!(f, "{}", name)
    }
}

/// A frame exactly as the device produced it
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Bytes per row (for the chroma plane of NV12 as well)
    pub stride: u32,
    pub data: FrameData,
    /// Clockwise rotation that makes the frame upright in the target orientation
    pub rotation: Rotation,
    /// Monotonic device sequence number
    pub sequence: u64,
    pub captured_at: Instant,
}

impl RawFrame {
    /// Tightly packed frame captured now
    pub fn new(width: u32, height: u32, format: PixelFormat, data: impl Into<FrameData>) -> Self {
        Self {
            width,
            height,
            format,
            // Oversized widths get a zero stride and fail validation
            stride: format.min_stride(width).unwrap_or(0),
            data: data.into(),
            rotation: Rotation::Degrees0,
            sequence: 0,
            captured_at: Instant::now(),
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
}

/// An upright frame in the session's output format
///
/// Buffers are tightly packed: no row padding, NV12 chroma follows luma.
#[derive(Debug, Clone)]
pub struct NormalizedFrame {
    pub width: u32,
    pub height: u32,
    pub format: OutputImageFormat,
    pub data: FrameData,
    pub sequence: u64,
    pub captured_at: Instant,
}

impl NormalizedFrame {
    /// Luma of one pixel (full-range BT.601 for RGBA frames)
    pub fn luma_at(&self, x: u32, y: u32) -> u8 {
        let idx = (y * self.width + x) as usize;
        match self.format {
            OutputImageFormat::Yuv420 => self.data[idx],
            OutputImageFormat::Rgba8888 => {
                let px = &self.data[idx * 4..idx * 4 + 3];
                rgb_to_luma(px[0], px[1], px[2])
            }
        }
    }

    /// Row-major luma plane, borrowed when the format already carries one
    pub fn luma_plane(&self) -> Cow<'_, [u8]> {
        let len = self.width as usize * self.height as usize;
        match self.format {
            OutputImageFormat::Yuv420 => Cow::Borrowed(&self.data[..len]),
            OutputImageFormat::Rgba8888 => Cow::Owned(
                self.data
                    .chunks_exact(4)
                    .map(|px| rgb_to_luma(px[0], px[1], px[2]))
                    .collect(),
            ),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

pub(crate) fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
}

/// Runtime switches for what a snapshot carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Include the normalized frame in snapshots
    pub camera_view_enabled: bool,
    /// Allocate an overlay surface for processors that draw
    pub visualisation_enabled: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            camera_view_enabled: true,
            visualisation_enabled: false,
        }
    }
}

/// Everything needed to start one generation of a capture session
///
/// Immutable once passed to `start`; a different configuration always means
/// a new generation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Requested resolution. Started states carry the bound one instead.
    pub resolution: Resolution,
    pub backpressure: BackpressureStrategy,
    pub target_rotation: Rotation,
    pub output_format: OutputImageFormat,
    /// Processors in invocation order
    pub processors: Vec<AnyProcessor>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            backpressure: BackpressureStrategy::default(),
            target_rotation: Rotation::default(),
            output_format: OutputImageFormat::default(),
            processors: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn with_processor(mut self, processor: impl Into<AnyProcessor>) -> Self {
        self.processors.push(processor.into());
        self
    }

    pub fn with_backpressure(mut self, backpressure: BackpressureStrategy) -> Self {
        self.backpressure = backpressure;
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_output_format(mut self, output_format: OutputImageFormat) -> Self {
        self.output_format = output_format;
        self
    }

    pub fn with_target_rotation(mut self, target_rotation: Rotation) -> Self {
        self.target_rotation = target_rotation;
        self
    }
}

/// One published result of a pipeline pass
///
/// Immutable once published; the next publication replaces it.
#[derive(Debug, Clone)]
pub struct CameraSnapshot {
    pub camera: Arc<CameraParams>,
    /// The normalized frame, absent when the camera view is disabled
    pub content: Option<Arc<NormalizedFrame>>,
    /// Processor drawings, present only when visualisation is enabled
    pub overlay: Option<Arc<RgbaImage>>,
    pub results: ProcessingResults,
    pub sequence: u64,
    /// Monotonic capture time of the source frame
    pub captured_at: Instant,
    /// Wall-clock time of publication
    pub timestamp: DateTime<Utc>,
    pub processing_duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_from_degrees_normalises() {
        assert_eq!(Rotation::from_degrees(-90), Rotation::Degrees270);
        assert_eq!(Rotation::from_degrees(450), Rotation::Degrees90);
        assert_eq!(Rotation::from_degrees(180), Rotation::Degrees180);
        assert_eq!(Rotation::Degrees270.then(Rotation::Degrees180), Rotation::Degrees90);
    }

    #[test]
    fn test_nearest_resolution() {
        let supported = [
            Resolution::new(640, 480),
            Resolution::new(1280, 720),
            Resolution::new(1920, 1080),
        ];
        assert_eq!(
            Resolution::new(1200, 700).nearest_in(&supported),
            Resolution::new(1280, 720)
        );
        assert_eq!(
            Resolution::new(320, 240).nearest_in(&[]),
            Resolution::new(320, 240)
        );
    }

    #[test]
    fn test_output_buffer_len() {
        assert_eq!(OutputImageFormat::Yuv420.buffer_len(4, 2), 8 + 4);
        assert_eq!(OutputImageFormat::Yuv420.buffer_len(3, 3), 9 + 8);
        assert_eq!(OutputImageFormat::Rgba8888.buffer_len(4, 2), 32);
    }

    #[test]
    fn test_row_size_overflow_is_none() {
        assert_eq!(PixelFormat::Rgba.min_stride(0x4000_0001), None);
        assert_eq!(PixelFormat::Rgb24.min_stride(u32::MAX), None);
        assert_eq!(PixelFormat::Gray8.min_stride(u32::MAX), Some(u32::MAX));
        assert_eq!(PixelFormat::Nv12.frame_len(4, 2), Some(12));

        let frame = RawFrame::new(0x4000_0001, 1, PixelFormat::Rgba, vec![0u8; 4]);
        assert_eq!(frame.stride, 0);
    }

    #[test]
    fn test_luma_plane_from_rgba() {
        let frame = NormalizedFrame {
            width: 2,
            height: 1,
            format: OutputImageFormat::Rgba8888,
            data: Arc::from(vec![0u8, 0, 0, 255, 255, 255, 255, 255]),
            sequence: 0,
            captured_at: Instant::now(),
        };
        assert_eq!(frame.luma_plane().as_ref(), &[0, 255]);
        assert_eq!(frame.luma_at(1, 0), 255);
    }
}
