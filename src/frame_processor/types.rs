// SPDX-License-Identifier: GPL-3.0-only

//! Core types for frame processing results
//!
//! These types represent the output of frame analysis tasks and are carried
//! by every published snapshot.

use super::{ImageProcessor, Processor, ProcessorId, ResultValue};
use std::any::Any;
use std::collections::HashMap;

/// Results of every processor that completed for one frame
///
/// Keys are unique per frame. A processor that failed, panicked or was
/// disabled has no entry; failures are listed in [`failed`](Self::failed).
#[derive(Clone, Default)]
pub struct ProcessingResults {
    values: HashMap<ProcessorId, ResultValue>,
    failed: Vec<ProcessorId>,
}

impl ProcessingResults {
    pub(crate) fn insert(&mut self, id: ProcessorId, value: ResultValue) {
        self.values.insert(id, value);
    }

    pub(crate) fn mark_failed(&mut self, id: ProcessorId) {
        self.failed.push(id);
    }

    /// Typed result of a processor
    pub fn get<P: ImageProcessor>(&self, processor: &Processor<P>) -> Option<&P::Output> {
        self.get_as::<P::Output>(processor.id())
    }

    /// Result for an identity, downcast to `T`
    ///
    /// A type that does not match the stored value yields `None`, the same as
    /// a missing entry.
    pub fn get_as<T: Any>(&self, id: ProcessorId) -> Option<&T> {
        self.values.get(&id).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains(&self, id: ProcessorId) -> bool {
        self.values.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ProcessorId> + '_ {
        self.values.keys().copied()
    }

    /// Processors whose invocation failed for this frame
    pub fn failed(&self) -> &[ProcessorId] {
        &self.failed
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for ProcessingResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.values.keys().collect();
        ids.sort();
        f.debug_struct("ProcessingResults")
            .field("ids", &ids)
            .field("failed", &self.failed)
            .finish()
    }
}

/// A rectangular region within a frame
///
/// Coordinates are normalized (0.0 to 1.0) relative to the frame dimensions.
/// This allows easy transformation to screen coordinates regardless of
/// the actual frame size or display scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRegion {
    /// Left edge (0.0 = left of frame, 1.0 = right of frame)
    pub x: f32,
    /// Top edge (0.0 = top of frame, 1.0 = bottom of frame)
    pub y: f32,
    /// Width as fraction of frame width
    pub width: f32,
    /// Height as fraction of frame height
    pub height: f32,
}

impl FrameRegion {
    /// Create a frame region from pixel coordinates
    pub fn from_pixels(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        Self {
            x: x as f32 / frame_width as f32,
            y: y as f32 / frame_height as f32,
            width: width as f32 / frame_width as f32,
            height: height as f32 / frame_height as f32,
        }
    }

    /// Pixel rectangle `(x, y, width, height)` on a surface of the given size
    pub fn to_pixels(&self, surface_width: u32, surface_height: u32) -> (u32, u32, u32, u32) {
        let sw = surface_width as f32;
        let sh = surface_height as f32;
        (
            (self.x * sw) as u32,
            (self.y * sh) as u32,
            (self.width * sw) as u32,
            (self.height * sh) as u32,
        )
    }
}

/// A decoded QR code and where it was found
#[derive(Debug, Clone, PartialEq)]
pub struct QrDetection {
    pub bounds: FrameRegion,
    pub content: String,
}

impl QrDetection {
    pub fn new(bounds: FrameRegion, content: String) -> Self {
        Self { bounds, content }
    }
}

/// Luminance statistics of one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LumaSummary {
    pub mean: f32,
    pub min: u8,
    pub max: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_frame_region_pixels() {
        let region = FrameRegion::from_pixels(10, 20, 30, 40, 100, 200);
        assert_eq!(region.x, 0.1);
        assert_eq!(region.height, 0.2);
        assert_eq!(region.to_pixels(200, 400), (20, 40, 60, 80));
    }

    #[test]
    fn test_mismatched_type_is_absent() {
        let id = ProcessorId::new();
        let mut results = ProcessingResults::default();
        results.insert(id, Arc::new(5u8));

        assert_eq!(results.get_as::<u8>(id), Some(&5));
        assert!(results.get_as::<u16>(id).is_none());
        assert!(results.contains(id));
        assert!(!results.contains(ProcessorId::new()));
    }
}
