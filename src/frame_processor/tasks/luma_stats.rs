// SPDX-License-Identifier: GPL-3.0-only

//! Frame brightness statistics

use super::fill_rect;
use crate::backends::camera::types::NormalizedFrame;
use crate::errors::ProcessorError;
use crate::frame_processor::types::LumaSummary;
use crate::frame_processor::{ImageProcessor, OverlayTarget};
use async_trait::async_trait;
use image::Rgba;
use tracing::trace;

/// Computes mean, minimum and maximum luma of every frame
///
/// With visualisation on it draws a level bar along the bottom edge whose
/// length follows the mean brightness.
#[derive(Debug, Clone)]
pub struct LumaStats {
    /// Only every n-th pixel in each direction is sampled
    step: usize,
}

impl Default for LumaStats {
    fn default() -> Self {
        Self { step: 1 }
    }
}

impl LumaStats {
    /// Sample every `step`-th pixel in each direction
    pub fn with_step(step: usize) -> Self {
        Self { step: step.max(1) }
    }
}

#[async_trait]
impl ImageProcessor for LumaStats {
    type Output = LumaSummary;

    fn name(&self) -> &str {
        "luma-stats"
    }

    async fn process(
        &self,
        frame: &NormalizedFrame,
        overlay: Option<&OverlayTarget>,
    ) -> Result<LumaSummary, ProcessorError> {
        let summary = summarize(frame, self.step)?;
        trace!(
            sequence = frame.sequence,
            mean = summary.mean,
            "Luma statistics computed"
        );

        if let Some(overlay) = overlay {
            overlay.draw(|canvas| {
                let (w, h) = canvas.dimensions();
                let bar_height = (h / 40).max(2);
                let bar_width = (w as f32 * summary.mean / 255.0) as u32;
                fill_rect(
                    canvas,
                    (0, h.saturating_sub(bar_height), bar_width, bar_height),
                    Rgba([255, 200, 0, 200]),
                );
            });
        }

        Ok(summary)
    }
}

fn summarize(frame: &NormalizedFrame, step: usize) -> Result<LumaSummary, ProcessorError> {
    let width = frame.width as usize;
    let luma = frame.luma_plane();

    let mut sum = 0u64;
    let mut count = 0u64;
    let mut min = u8::MAX;
    let mut max = u8::MIN;

    for row in luma.chunks_exact(width.max(1)).step_by(step) {
        for &value in row.iter().step_by(step) {
            sum += value as u64;
            count += 1;
            min = min.min(value);
            max = max.max(value);
        }
    }

    if count == 0 {
        return Err(ProcessorError::Failed("empty frame".to_string()));
    }

    Ok(LumaSummary {
        mean: sum as f32 / count as f32,
        min,
        max,
    })
}
