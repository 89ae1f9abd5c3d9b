// SPDX-License-Identifier: GPL-3.0-only

//! Per-frame pipeline pass
//!
//! Each session generation runs one frame lane: a single task that takes
//! frames from the intake in arrival order and, for each one,
//!
//! 1. normalizes it (rotation to upright, output pixel format),
//! 2. runs every enabled processor concurrently on it,
//! 3. waits for all of them and collects their results,
//! 4. publishes a [`CameraSnapshot`] if the generation is still started.
//!
//! A conversion failure drops the frame. A processor failure only removes
//! that processor's result. When the generation's stop signal fires the
//! in-flight processor tasks are aborted and awaited before the lane exits.

use super::converter::FrameConverter;
use super::frame_loop::StopListener;
use super::intake::{FrameSource, IntakeFrame};
use super::state::CaptureState;
use super::types::{CameraParams, CameraSnapshot, SessionConfig, SnapshotConfig};
use crate::constants::timing::SNAPSHOT_LOG_INTERVAL;
use crate::errors::{ConversionError, ProcessorError};
use crate::frame_processor::{AnyProcessor, OverlayTarget, ProcessingResults};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

/// Frame counters of one session generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames accepted by the intake
    pub frames_received: u64,
    /// Frames replaced in the intake before they were processed
    pub frames_dropped: u64,
    /// Frames dropped because they could not be normalized
    pub conversion_failures: u64,
    /// Processor invocations that failed or panicked
    pub processor_failures: u64,
    pub snapshots_published: u64,
    /// Duration of the most recent completed pass
    pub last_processing_duration: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    conversion_failures: AtomicU64,
    processor_failures: AtomicU64,
    snapshots_published: AtomicU64,
    last_processing_us: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn report(&self) -> PipelineStats {
        PipelineStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            conversion_failures: self.conversion_failures.load(Ordering::Relaxed),
            processor_failures: self.processor_failures.load(Ordering::Relaxed),
            snapshots_published: self.snapshots_published.load(Ordering::Relaxed),
            last_processing_duration: Duration::from_micros(
                self.last_processing_us.load(Ordering::Relaxed),
            ),
        }
    }
}

/// The session's state and snapshot cells
///
/// State transitions and snapshot publication take the same gate, so a
/// snapshot can never land after the state has left `Started`.
pub(crate) struct Publisher {
    state: watch::Sender<CaptureState>,
    snapshot: watch::Sender<Option<Arc<CameraSnapshot>>>,
    gate: Mutex<()>,
}

impl Publisher {
    pub(crate) fn new() -> Self {
        Self {
            state: watch::Sender::new(CaptureState::Idle),
            snapshot: watch::Sender::new(None),
            gate: Mutex::new(()),
        }
    }

    pub(crate) fn state(&self) -> CaptureState {
        self.state.borrow().clone()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    pub(crate) fn subscribe_snapshot(&self) -> watch::Receiver<Option<Arc<CameraSnapshot>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn set_state(&self, state: CaptureState) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.state.send_replace(state);
    }

    pub(crate) fn clear_snapshot(&self) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.snapshot.send_replace(None);
    }

    /// Publish if `generation` is the config of the current `Started` state
    fn publish(&self, generation: &Arc<SessionConfig>, snapshot: CameraSnapshot) -> bool {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let live = matches!(
            &*self.state.borrow(),
            CaptureState::Started(config) if Arc::ptr_eq(config, generation)
        );
        if live {
            self.snapshot.send_replace(Some(Arc::new(snapshot)));
        }
        live
    }
}

/// Everything the frame lane of one generation needs
pub(crate) struct FrameLane {
    pub camera: Arc<CameraParams>,
    /// The started configuration; also identifies the generation
    pub config: Arc<SessionConfig>,
    pub generation: u64,
    pub converter: Arc<dyn FrameConverter>,
    pub snapshot_config: watch::Receiver<SnapshotConfig>,
    pub publisher: Arc<Publisher>,
    pub stats: Arc<StatsCounters>,
    pub stop: StopListener,
}

impl FrameLane {
    /// Process frames until the stop signal fires or the intake closes
    pub(crate) async fn run(self, source: FrameSource) {
        debug!(
            camera_id = %self.camera.camera_id,
            generation = self.generation,
            processors = self.config.processors.len(),
            "Frame lane started"
        );

        loop {
            let intake = tokio::select! {
                biased;
                _ = self.stop.stopped() => break,
                next = source.next() => match next {
                    Some(intake) => intake,
                    None => break,
                },
            };

            let intake_stats = source.stats();
            self.stats
                .frames_received
                .store(intake_stats.received, Ordering::Relaxed);
            self.stats
                .frames_dropped
                .store(intake_stats.dropped, Ordering::Relaxed);

            if !self.process(intake).await {
                break;
            }
        }

        debug!(
            camera_id = %self.camera.camera_id,
            generation = self.generation,
            "Frame lane finished"
        );
    }

    /// One pipeline pass; returns `false` if the generation was stopped
    async fn process(&self, intake: IntakeFrame) -> bool {
        let started = Instant::now();
        let raw = &intake.frame;

        let converted = panic::catch_unwind(AssertUnwindSafe(|| {
            self.converter
                .normalize(raw, raw.rotation, self.config.output_format)
        }))
        .unwrap_or_else(|payload| Err(ConversionError::Panicked(panic_message(&*payload))));
        let frame = match converted {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                self.stats.conversion_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    camera_id = %self.camera.camera_id,
                    sequence = raw.sequence,
                    error = %e,
                    "Dropping frame that failed conversion"
                );
                return true;
            }
        };

        let snapshot_config = *self.snapshot_config.borrow();
        let overlay = snapshot_config
            .visualisation_enabled
            .then(|| OverlayTarget::new(frame.width, frame.height));

        let mut tasks = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, AnyProcessor> = HashMap::new();
        for processor in self.config.processors.iter().filter(|p| p.enabled()) {
            let task_processor = processor.clone();
            let task_frame = Arc::clone(&frame);
            let task_overlay = overlay
                .clone()
                .filter(|_| processor.visualisation_enabled());
            let handle = tasks.spawn(async move {
                task_processor
                    .process(&task_frame, task_overlay.as_ref())
                    .await
            });
            running.insert(handle.id(), processor.clone());
        }

        let mut results = ProcessingResults::default();
        loop {
            let joined = tokio::select! {
                biased;
                _ = self.stop.stopped() => {
                    tasks.shutdown().await;
                    trace!(sequence = frame.sequence, "Abandoned in-flight frame");
                    return false;
                }
                joined = tasks.join_next_with_id() => joined,
            };
            let Some(joined) = joined else { break };

            let (task_id, outcome) = match joined {
                Ok((task_id, outcome)) => (task_id, outcome),
                Err(join_error) => (
                    join_error.id(),
                    Err(if join_error.is_panic() {
                        ProcessorError::Panicked(join_error.to_string())
                    } else {
                        ProcessorError::Cancelled
                    }),
                ),
            };
            let Some(processor) = running.get(&task_id) else {
                continue;
            };

            match outcome {
                Ok(value) => results.insert(processor.id(), value),
                Err(e) => {
                    self.stats.processor_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        camera_id = %self.camera.camera_id,
                        processor = processor.name(),
                        sequence = frame.sequence,
                        error = %e,
                        "Processor failed on frame"
                    );
                    results.mark_failed(processor.id());
                }
            }
        }

        let overlay = overlay.map(|o| Arc::new(o.into_image()));
        let processing_duration = started.elapsed();
        let snapshot = CameraSnapshot {
            camera: Arc::clone(&self.camera),
            content: snapshot_config.camera_view_enabled.then(|| Arc::clone(&frame)),
            overlay,
            results,
            sequence: frame.sequence,
            captured_at: frame.captured_at,
            timestamp: chrono::Utc::now(),
            processing_duration,
        };

        self.stats
            .last_processing_us
            .store(processing_duration.as_micros() as u64, Ordering::Relaxed);

        if self.publisher.publish(&self.config, snapshot) {
            let published = self.stats.snapshots_published.fetch_add(1, Ordering::Relaxed) + 1;
            if published % SNAPSHOT_LOG_INTERVAL == 0 {
                debug!(
                    camera_id = %self.camera.camera_id,
                    published,
                    processing_us = processing_duration.as_micros() as u64,
                    "Published snapshots"
                );
            }
        }

        // Releases the intake permit under BlockProducer
        drop(intake);
        true
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::converter::SoftwareConverter;
    use crate::backends::camera::frame_loop::StopSignal;
    use crate::backends::camera::intake;
    use crate::backends::camera::types::{
        BackpressureStrategy, NormalizedFrame, PixelFormat, RawFrame,
    };
    use crate::frame_processor::{ImageProcessor, Processor};
    use async_trait::async_trait;

    struct Fixed(&'static str);

    #[async_trait]
    impl ImageProcessor for Fixed {
        type Output = &'static str;

        fn name(&self) -> &str {
            "fixed"
        }

        async fn process(
            &self,
            _frame: &NormalizedFrame,
            _overlay: Option<&OverlayTarget>,
        ) -> Result<&'static str, ProcessorError> {
            Ok(self.0)
        }
    }

    struct Panicking;

    #[async_trait]
    impl ImageProcessor for Panicking {
        type Output = ();

        fn name(&self) -> &str {
            "panicking"
        }

        async fn process(
            &self,
            _frame: &NormalizedFrame,
            _overlay: Option<&OverlayTarget>,
        ) -> Result<(), ProcessorError> {
            panic!("processor bug")
        }
    }

    struct Harness {
        publisher: Arc<Publisher>,
        stats: Arc<StatsCounters>,
        stop: StopSignal,
        sink: intake::FrameSink,
        lane: tokio::task::JoinHandle<()>,
    }

    fn start_lane(config: SessionConfig) -> Harness {
        let config = Arc::new(config);
        let publisher = Arc::new(Publisher::new());
        publisher.set_state(CaptureState::Started(config.clone()));
        let stats = Arc::new(StatsCounters::default());
        let stop = StopSignal::new();
        let (sink, source) = intake::channel(BackpressureStrategy::BlockProducer);
        let (_tx, snapshot_config) = watch::channel(SnapshotConfig::default());

        let lane = FrameLane {
            camera: Arc::new(CameraParams::new("cam0")),
            config,
            generation: 1,
            converter: Arc::new(SoftwareConverter),
            snapshot_config,
            publisher: publisher.clone(),
            stats: stats.clone(),
            stop: stop.listener(),
        };
        let lane = tokio::spawn(lane.run(source));
        Harness {
            publisher,
            stats,
            stop,
            sink,
            lane,
        }
    }

    fn gray(sequence: u64) -> RawFrame {
        RawFrame::new(2, 2, PixelFormat::Gray8, vec![128u8; 4]).with_sequence(sequence)
    }

    #[tokio::test]
    async fn test_panicking_processor_is_isolated() {
        let fixed = Processor::new(Fixed("ok"));
        let panicking = Processor::new(Panicking);
        let h = start_lane(
            SessionConfig::default()
                .with_processor(&fixed)
                .with_processor(&panicking),
        );
        let mut snapshots = h.publisher.subscribe_snapshot();

        h.sink.submit(gray(1)).await.unwrap();
        let snapshot = snapshots
            .wait_for(|s| s.is_some())
            .await
            .unwrap()
            .clone()
            .unwrap();

        assert_eq!(snapshot.results.get(&fixed), Some(&"ok"));
        assert!(!snapshot.results.contains(panicking.id()));
        assert_eq!(snapshot.results.failed(), &[panicking.id()]);
        assert_eq!(h.stats.report().processor_failures, 1);

        h.stop.trigger();
        h.lane.await.unwrap();
    }

    #[tokio::test]
    async fn test_conversion_failure_drops_frame() {
        let h = start_lane(SessionConfig::default());
        let mut snapshots = h.publisher.subscribe_snapshot();

        let mut broken = gray(1);
        broken.data = Arc::from(vec![0u8; 1]);
        h.sink.submit(broken).await.unwrap();
        h.sink.submit(gray(2)).await.unwrap();

        let snapshot = snapshots
            .wait_for(|s| s.is_some())
            .await
            .unwrap()
            .clone()
            .unwrap();
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(h.stats.report().conversion_failures, 1);

        h.stop.trigger();
        h.lane.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_publication_outside_started() {
        let h = start_lane(SessionConfig::default());
        h.publisher.set_state(CaptureState::Idle);
        let snapshots = h.publisher.subscribe_snapshot();

        h.sink.submit(gray(1)).await.unwrap();
        // The permit comes back once the pass is done
        h.sink.submit(gray(2)).await.unwrap();
        h.stop.trigger();
        h.lane.await.unwrap();

        assert!(snapshots.borrow().is_none());
        assert_eq!(h.stats.report().snapshots_published, 0);
    }
}
