// SPDX-License-Identifier: GPL-3.0-only

//! QR code detection task
//!
//! This module implements QR code detection using the rqrr crate.
//! It takes the luma plane of each frame and searches for QR codes,
//! returning their positions and decoded content.

use super::draw_rect_outline;
use crate::backends::camera::types::NormalizedFrame;
use crate::constants::processing::QR_MAX_DIMENSION;
use crate::errors::ProcessorError;
use crate::frame_processor::types::{FrameRegion, QrDetection};
use crate::frame_processor::{ImageProcessor, OverlayTarget};
use async_trait::async_trait;
use image::Rgba;
use tracing::{debug, trace};

/// QR code detector
///
/// Analyzes camera frames to detect and decode QR codes.
/// Optimized for real-time processing with frame downscaling.
#[derive(Debug, Clone)]
pub struct QrDetector {
    /// Maximum dimension for processing (frames are downscaled to this)
    max_dimension: u32,
}

impl Default for QrDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl QrDetector {
    /// Create a new QR detector with default settings
    pub fn new() -> Self {
        Self {
            max_dimension: QR_MAX_DIMENSION,
        }
    }

    /// Create a QR detector with custom max dimension
    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }
}

#[async_trait]
impl ImageProcessor for QrDetector {
    type Output = Vec<QrDetection>;

    fn name(&self) -> &str {
        "qr-detector"
    }

    async fn process(
        &self,
        frame: &NormalizedFrame,
        overlay: Option<&OverlayTarget>,
    ) -> Result<Vec<QrDetection>, ProcessorError> {
        let luma = frame.luma_plane().into_owned();
        let (width, height) = (frame.width, frame.height);
        let max_dim = self.max_dimension;

        // Run detection in a blocking task to avoid blocking the async runtime
        let detections =
            tokio::task::spawn_blocking(move || detect_sync(&luma, width, height, max_dim))
                .await
                .map_err(|e| ProcessorError::Panicked(e.to_string()))?;

        if let Some(overlay) = overlay {
            overlay.draw(|canvas| {
                let (w, h) = canvas.dimensions();
                for detection in &detections {
                    draw_rect_outline(
                        canvas,
                        detection.bounds.to_pixels(w, h),
                        2,
                        Rgba([0, 255, 0, 255]),
                    );
                }
            });
        }

        Ok(detections)
    }
}

/// Synchronous QR detection (runs in blocking task)
fn detect_sync(luma: &[u8], width: u32, height: u32, max_dimension: u32) -> Vec<QrDetection> {
    let start = std::time::Instant::now();

    let scale = (width as f32 / max_dimension as f32)
        .max(height as f32 / max_dimension as f32)
        .max(1.0);
    let proc_width = ((width as f32 / scale) as usize).max(1);
    let proc_height = ((height as f32 / scale) as usize).max(1);
    let src_width = width as usize;

    // Nearest-neighbour sampling doubles as the downscale
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(proc_width, proc_height, |x, y| {
        let sx = ((x as f32 * scale) as usize).min(src_width - 1);
        let sy = ((y as f32 * scale) as usize).min(height as usize - 1);
        luma[sy * src_width + sx]
    });

    let grids = prepared.detect_grids();
    trace!(
        proc_width,
        proc_height,
        scale,
        count = grids.len(),
        detection_ms = start.elapsed().as_millis(),
        "QR grid detection complete"
    );

    let mut detections = Vec::with_capacity(grids.len());
    for grid in grids {
        let content = match grid.decode() {
            Ok((_meta, content)) => content,
            Err(e) => {
                debug!(error = %e, "Failed to decode QR code");
                continue;
            }
        };

        let xs = grid.bounds.iter().map(|p| p.x as f32);
        let ys = grid.bounds.iter().map(|p| p.y as f32);
        let min_x = xs.clone().fold(f32::MAX, f32::min).max(0.0);
        let max_x = xs.fold(f32::MIN, f32::max).min(proc_width as f32);
        let min_y = ys.clone().fold(f32::MAX, f32::min).max(0.0);
        let max_y = ys.fold(f32::MIN, f32::max).min(proc_height as f32);

        // Scale back to original frame coordinates
        let region = FrameRegion::from_pixels(
            (min_x * scale) as u32,
            (min_y * scale) as u32,
            ((max_x - min_x) * scale) as u32,
            ((max_y - min_y) * scale) as u32,
            width,
            height,
        );

        debug!(
            content = %content,
            x = region.x,
            y = region.y,
            width = region.width,
            height = region.height,
            "Detected QR code"
        );

        detections.push(QrDetection::new(region, content));
    }

    if !detections.is_empty() {
        debug!(
            count = detections.len(),
            total_ms = start.elapsed().as_millis(),
            "QR detection found codes"
        );
    }

    detections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::OutputImageFormat;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_blank_frame_has_no_codes() {
        let luma = vec![255u8; 64 * 48];
        assert!(detect_sync(&luma, 64, 48, 640).is_empty());
    }

    #[test]
    fn test_downscaled_blank_frame_has_no_codes() {
        let luma = vec![0u8; 200 * 100];
        assert!(detect_sync(&luma, 200, 100, 50).is_empty());
    }

    #[tokio::test]
    async fn test_process_rgba_frame() {
        let frame = NormalizedFrame {
            width: 8,
            height: 8,
            format: OutputImageFormat::Rgba8888,
            data: Arc::from(vec![255u8; 8 * 8 * 4]),
            sequence: 3,
            captured_at: Instant::now(),
        };
        let detections = QrDetector::new().process(&frame, None).await.unwrap();
        assert!(detections.is_empty());
    }
}
