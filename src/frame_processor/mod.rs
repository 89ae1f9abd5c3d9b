// SPDX-License-Identifier: GPL-3.0-only

//! Frame processor contract and per-frame result aggregation
//!
//! A processor analyses one normalized frame at a time and produces a typed
//! result. Sessions hold processors type-erased as [`AnyProcessor`]; callers
//! keep the typed [`Processor`] handle to toggle it and to read its results
//! back out of a snapshot.
//!
//! ```ignore
//! let luma = Processor::new(LumaStats::default());
//! let config = SessionConfig::default().with_processor(&luma);
//! session.start(config).await;
//!
//! let snapshot = session.snapshot().borrow().clone();
//! if let Some(stats) = snapshot.and_then(|s| s.results.get(&luma).copied()) {
//!     println!("mean luma {}", stats.mean);
//! }
//! ```

pub mod tasks;
pub mod types;

use crate::backends::camera::types::NormalizedFrame;
use crate::errors::ProcessorError;
use async_trait::async_trait;
use image::RgbaImage;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

pub use tasks::{LumaStats, QrDetector};
pub use types::{FrameRegion, LumaSummary, ProcessingResults, QrDetection};

/// Type-erased processor output stored in [`ProcessingResults`]
pub type ResultValue = Arc<dyn Any + Send + Sync>;

/// A frame analysis task
///
/// `process` may run concurrently with other processors on the same frame but
/// never concurrently with itself inside one session. Implementations that
/// keep state across frames must synchronize it themselves.
#[async_trait]
pub trait ImageProcessor: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    /// Short name used in logs
    fn name(&self) -> &str;

    /// Analyse one frame, optionally drawing into the overlay
    async fn process(
        &self,
        frame: &NormalizedFrame,
        overlay: Option<&OverlayTarget>,
    ) -> Result<Self::Output, ProcessorError>;

    /// Free resources when the session generation ends
    async fn release(&self) -> Result<(), ProcessorError> {
        Ok(())
    }
}

/// Stable identity of a processor, used as the result key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(Uuid);

impl ProcessorId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ProcessorCell<P> {
    id: ProcessorId,
    enabled: AtomicBool,
    visualisation_enabled: AtomicBool,
    processor: P,
}

/// Typed handle to a processor registered with a session
///
/// Clones share the same processor and flags.
pub struct Processor<P: ImageProcessor> {
    cell: Arc<ProcessorCell<P>>,
}

impl<P: ImageProcessor> Clone for Processor<P> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<P: ImageProcessor> Processor<P> {
    /// Wrap a processor; it starts enabled with visualisation on
    pub fn new(processor: P) -> Self {
        Self {
            cell: Arc::new(ProcessorCell {
                id: ProcessorId::new(),
                enabled: AtomicBool::new(true),
                visualisation_enabled: AtomicBool::new(true),
                processor,
            }),
        }
    }

    pub fn id(&self) -> ProcessorId {
        self.cell.id
    }

    pub fn get(&self) -> &P {
        &self.cell.processor
    }

    pub fn enabled(&self) -> bool {
        self.cell.enabled.load(Ordering::Acquire)
    }

    /// Toggle the processor; takes effect from the next frame
    pub fn set_enabled(&self, enabled: bool) {
        self.cell.enabled.store(enabled, Ordering::Release);
    }

    pub fn visualisation_enabled(&self) -> bool {
        self.cell.visualisation_enabled.load(Ordering::Acquire)
    }

    pub fn set_visualisation_enabled(&self, enabled: bool) {
        self.cell
            .visualisation_enabled
            .store(enabled, Ordering::Release);
    }

    pub fn erase(&self) -> AnyProcessor {
        AnyProcessor(self.cell.clone())
    }
}

#[async_trait]
trait DynProcessor: Send + Sync {
    fn id(&self) -> ProcessorId;
    fn name(&self) -> &str;
    fn enabled(&self) -> bool;
    fn visualisation_enabled(&self) -> bool;
    async fn process(
        &self,
        frame: &NormalizedFrame,
        overlay: Option<&OverlayTarget>,
    ) -> Result<ResultValue, ProcessorError>;
    async fn release(&self) -> Result<(), ProcessorError>;
}

#[async_trait]
impl<P: ImageProcessor> DynProcessor for ProcessorCell<P> {
    fn id(&self) -> ProcessorId {
        self.id
    }

    fn name(&self) -> &str {
        self.processor.name()
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn visualisation_enabled(&self) -> bool {
        self.visualisation_enabled.load(Ordering::Acquire)
    }

    async fn process(
        &self,
        frame: &NormalizedFrame,
        overlay: Option<&OverlayTarget>,
    ) -> Result<ResultValue, ProcessorError> {
        let output = self.processor.process(frame, overlay).await?;
        Ok(Arc::new(output) as ResultValue)
    }

    async fn release(&self) -> Result<(), ProcessorError> {
        self.processor.release().await
    }
}

/// Type-erased processor as stored in a session configuration
#[derive(Clone)]
pub struct AnyProcessor(Arc<dyn DynProcessor>);

impl AnyProcessor {
    pub fn id(&self) -> ProcessorId {
        self.0.id()
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn enabled(&self) -> bool {
        self.0.enabled()
    }

    pub fn visualisation_enabled(&self) -> bool {
        self.0.visualisation_enabled()
    }

    pub(crate) async fn process(
        &self,
        frame: &NormalizedFrame,
        overlay: Option<&OverlayTarget>,
    ) -> Result<ResultValue, ProcessorError> {
        self.0.process(frame, overlay).await
    }

    pub(crate) async fn release(&self) -> Result<(), ProcessorError> {
        self.0.release().await
    }
}

impl<P: ImageProcessor> From<Processor<P>> for AnyProcessor {
    fn from(processor: Processor<P>) -> Self {
        AnyProcessor(processor.cell)
    }
}

impl<P: ImageProcessor> From<&Processor<P>> for AnyProcessor {
    fn from(processor: &Processor<P>) -> Self {
        processor.erase()
    }
}

impl PartialEq for AnyProcessor {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for AnyProcessor {}

impl std::fmt::Debug for AnyProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyProcessor")
            .field("name", &self.name())
            .field("id", &self.id())
            .field("enabled", &self.enabled())
            .finish()
    }
}

/// Drawing surface shared by the processors of one frame
///
/// `process` calls run concurrently; draws are serialized through the lock.
#[derive(Clone)]
pub struct OverlayTarget {
    canvas: Arc<Mutex<RgbaImage>>,
}

impl OverlayTarget {
    /// Transparent surface of the given size
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: Arc::new(Mutex::new(RgbaImage::new(width, height))),
        }
    }

    /// Run a drawing closure with exclusive access to the surface
    pub fn draw<R>(&self, f: impl FnOnce(&mut RgbaImage) -> R) -> R {
        let mut canvas = self.canvas.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut canvas)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.draw(|canvas| canvas.dimensions())
    }

    /// Take the finished drawing once every processor has returned
    pub(crate) fn into_image(self) -> RgbaImage {
        match Arc::try_unwrap(self.canvas) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}
