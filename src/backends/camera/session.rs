// SPDX-License-Identifier: GPL-3.0-only

//! Capture session lifecycle
//!
//! A [`CaptureSession`] owns one camera. Each successful `start` begins a new
//! generation: an opened device, a bound stream, a frame lane and a control
//! channel. `stop`, a restart or a device fault ends the generation. All
//! transitions are serialized by one async lock, so a session never has two
//! transitions in flight and never binds two configurations at once.
//!
//! Observers read three live cells, each replaying its latest value to new
//! subscribers: the [`CaptureState`], the latest [`CameraSnapshot`] and the
//! current [`ControlChannel`].

use super::controls::ControlChannel;
use super::converter::FrameConverter;
use super::frame_loop::{StopListener, StopSignal};
use super::intake::{self, FrameSource};
use super::pipeline::{FrameLane, PipelineStats, Publisher, StatsCounters};
use super::state::CaptureState;
use super::types::{CameraParams, CameraSnapshot, SessionConfig, SnapshotConfig};
use super::{DeviceDirectory, DeviceEvent, DeviceHandle, StreamRequest};
use crate::errors::CameraError;
use crate::frame_processor::AnyProcessor;
use futures::{FutureExt, Stream};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Resources of the live generation
struct ActiveStream {
    generation: u64,
    /// Started configuration (with the bound resolution)
    config: Arc<SessionConfig>,
    device: Box<dyn DeviceHandle>,
    stop: StopSignal,
    lane: JoinHandle<()>,
    fault_watcher: JoinHandle<()>,
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.stop.trigger();
        self.fault_watcher.abort();
    }
}

/// Lifecycle state machine and frame pipeline for one camera
pub struct CaptureSession {
    weak: Weak<CaptureSession>,
    camera: watch::Sender<Arc<CameraParams>>,
    directory: Arc<dyn DeviceDirectory>,
    converter: Arc<dyn FrameConverter>,
    publisher: Arc<Publisher>,
    snapshot_config: watch::Sender<SnapshotConfig>,
    controls: watch::Sender<Option<Arc<ControlChannel>>>,
    stats: Mutex<Arc<StatsCounters>>,
    generation: AtomicU64,
    active: tokio::sync::Mutex<Option<ActiveStream>>,
}

impl CaptureSession {
    pub fn new(
        camera: CameraParams,
        directory: Arc<dyn DeviceDirectory>,
        converter: Arc<dyn FrameConverter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            camera: watch::Sender::new(Arc::new(camera)),
            directory,
            converter,
            publisher: Arc::new(Publisher::new()),
            snapshot_config: watch::Sender::new(SnapshotConfig::default()),
            controls: watch::Sender::new(None),
            stats: Mutex::new(Arc::new(StatsCounters::default())),
            generation: AtomicU64::new(0),
            active: tokio::sync::Mutex::new(None),
        })
    }

    // ===== Observable state =====

    pub fn camera_id(&self) -> String {
        self.camera.borrow().camera_id.clone()
    }

    pub fn camera_params(&self) -> Arc<CameraParams> {
        self.camera.borrow().clone()
    }

    pub fn subscribe_camera_params(&self) -> watch::Receiver<Arc<CameraParams>> {
        self.camera.subscribe()
    }

    /// Replace the camera metadata after a directory refresh
    pub(crate) fn update_camera_params(&self, params: CameraParams) {
        self.camera.send_if_modified(|current| {
            if **current == params {
                false
            } else {
                *current = Arc::new(params);
                true
            }
        });
    }

    pub fn state(&self) -> CaptureState {
        self.publisher.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CaptureState> {
        self.publisher.subscribe_state()
    }

    pub fn snapshot(&self) -> Option<Arc<CameraSnapshot>> {
        self.publisher.subscribe_snapshot().borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<Arc<CameraSnapshot>>> {
        self.publisher.subscribe_snapshot()
    }

    /// Stream of published snapshots, starting with the current one
    ///
    /// Intermediate snapshots are skipped if the consumer falls behind.
    pub fn snapshot_stream(&self) -> impl Stream<Item = Arc<CameraSnapshot>> + Send + 'static {
        let mut rx = self.publisher.subscribe_snapshot();
        async_stream::stream! {
            loop {
                let current = rx.borrow_and_update().clone();
                if let Some(snapshot) = current {
                    yield snapshot;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    pub fn snapshot_config(&self) -> SnapshotConfig {
        *self.snapshot_config.borrow()
    }

    pub fn subscribe_snapshot_config(&self) -> watch::Receiver<SnapshotConfig> {
        self.snapshot_config.subscribe()
    }

    /// Change what snapshots carry; applies from the next frame
    pub fn set_snapshot_config(&self, config: SnapshotConfig) {
        self.snapshot_config.send_replace(config);
    }

    /// Control channel of the live generation
    pub fn controls(&self) -> Option<Arc<ControlChannel>> {
        self.controls.borrow().clone()
    }

    pub fn subscribe_controls(&self) -> watch::Receiver<Option<Arc<ControlChannel>>> {
        self.controls.subscribe()
    }

    /// Counters of the current or most recent generation
    pub fn stats(&self) -> PipelineStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .report()
    }

    // ===== Lifecycle =====

    /// Start a new generation with `config`
    ///
    /// A live generation is stopped first. Resolves once the device has
    /// confirmed the stream or the attempt has failed, and returns the
    /// resulting state. The `Started` state carries the resolution the device
    /// actually bound.
    ///
    /// The transition runs on its own task: dropping the returned future does
    /// not abandon it halfway.
    pub async fn start(&self, config: SessionConfig) -> CaptureState {
        self.detached(|session| async move { session.start_transition(config).await })
            .await
    }

    /// Stop the live generation
    ///
    /// Returns once the frame lane has drained, the device is unbound and
    /// every processor has been released. No snapshot of the stopped
    /// generation is published after this returns. Without a live
    /// generation this is a no-op returning the current state.
    ///
    /// Like `start`, the teardown completes even if the caller is cancelled.
    pub async fn stop(&self) -> CaptureState {
        self.detached(|session| async move { session.stop_transition().await })
            .await
    }

    async fn detached<F, Fut>(&self, transition: F) -> CaptureState
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = CaptureState> + Send + 'static,
    {
        let Some(session) = self.weak.upgrade() else {
            return self.state();
        };
        match tokio::spawn(transition(session)).await {
            Ok(state) => state,
            Err(e) => {
                error!(
                    camera_id = %self.camera_id(),
                    error = %e,
                    "Session transition task failed"
                );
                self.state()
            }
        }
    }

    async fn start_transition(&self, config: SessionConfig) -> CaptureState {
        let mut active = self.active.lock().await;
        if let Some(stream) = active.take() {
            info!(
                camera_id = %self.camera_id(),
                generation = stream.generation,
                "Restarting capture session"
            );
            self.teardown(stream, None).await;
        }

        let requested = Arc::new(config);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.publisher
            .set_state(CaptureState::Starting(requested.clone()));
        info!(
            camera_id = %self.camera_id(),
            generation,
            resolution = %requested.resolution,
            backpressure = %requested.backpressure,
            "Starting capture session"
        );

        let state = match self.open(generation, &requested).await {
            Ok(stream) => {
                let state = CaptureState::Started(stream.config.clone());
                info!(
                    camera_id = %self.camera_id(),
                    generation,
                    resolution = %stream.config.resolution,
                    "Capture session started"
                );
                *active = Some(stream);
                state
            }
            Err(e) => {
                warn!(
                    camera_id = %self.camera_id(),
                    generation,
                    error = %e,
                    "Failed to start capture session"
                );
                CaptureState::ConfiguredError(requested, e)
            }
        };
        self.publisher.set_state(state.clone());
        state
    }

    async fn stop_transition(&self) -> CaptureState {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(stream) => {
                self.teardown(stream, None).await;
                info!(camera_id = %self.camera_id(), "Capture session stopped");
            }
            None => debug!(camera_id = %self.camera_id(), "Stop without a live stream"),
        }
        self.state()
    }

    async fn open(
        &self,
        generation: u64,
        requested: &Arc<SessionConfig>,
    ) -> Result<ActiveStream, CameraError> {
        let camera = self.camera_params();
        let mut device = self
            .directory
            .open_device(&camera.camera_id)
            .await
            .map_err(CameraError::from_open)?;

        let (sink, source) = intake::channel(requested.backpressure);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let request = StreamRequest {
            resolution: requested.resolution,
            target_rotation: requested.target_rotation,
            sink,
            events: events_tx.clone(),
        };
        let bound = match device.bind_stream(request).await {
            Ok(bound) => bound,
            Err(e) => {
                device.unbind().await;
                return Err(CameraError::from_open(e));
            }
        };

        let config = Arc::new(SessionConfig {
            resolution: bound.resolution,
            ..(**requested).clone()
        });
        let stop = StopSignal::new();
        let stats = Arc::new(StatsCounters::default());
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = stats.clone();

        let lane = FrameLane {
            camera: camera.clone(),
            config: config.clone(),
            generation,
            converter: self.converter.clone(),
            snapshot_config: self.snapshot_config.subscribe(),
            publisher: self.publisher.clone(),
            stats,
            stop: stop.listener(),
        };
        let lane = tokio::spawn(supervise_lane(lane, source, events_tx, stop.listener()));

        let controls = ControlChannel::new(&camera.camera_id, device.control(), stop.listener());
        self.controls.send_replace(Some(Arc::new(controls)));

        let fault_watcher = tokio::spawn(watch_faults(
            self.weak.clone(),
            generation,
            events_rx,
            stop.listener(),
        ));

        Ok(ActiveStream {
            generation,
            config,
            device,
            stop,
            lane,
            fault_watcher,
        })
    }

    /// End a generation; `fault` selects the error state instead of `Idle`
    async fn teardown(&self, mut stream: ActiveStream, fault: Option<CameraError>) {
        let config = stream.config.clone();
        match &fault {
            Some(cause) => self.publisher.set_state(CaptureState::failed(
                Some(config.clone()),
                cause.clone(),
            )),
            None => self
                .publisher
                .set_state(CaptureState::Stopping(config.clone())),
        }

        stream.stop.trigger();
        stream.fault_watcher.abort();
        if let Err(e) = (&mut stream.lane).await {
            warn!(
                camera_id = %self.camera_id(),
                generation = stream.generation,
                error = %e,
                "Frame lane ended abnormally"
            );
        }

        self.publisher.clear_snapshot();
        self.controls.send_replace(None);
        stream.device.unbind().await;
        release_processors(&self.camera_id(), &config.processors).await;

        if fault.is_none() {
            self.publisher.set_state(CaptureState::Idle);
        }
    }

    async fn handle_fault(&self, generation: u64, event: DeviceEvent) {
        let mut active = self.active.lock().await;
        let Some(stream) = active.take_if(|s| s.generation == generation) else {
            debug!(generation, "Ignoring fault from a finished generation");
            return;
        };

        let cause = match event {
            DeviceEvent::Fault(msg) => CameraError::DeviceFault(msg),
            DeviceEvent::Disconnected => CameraError::DeviceFault("device disconnected".into()),
        };
        error!(
            camera_id = %self.camera_id(),
            generation,
            error = %cause,
            "Camera device fault"
        );
        self.teardown(stream, Some(cause)).await;
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("camera_id", &self.camera_id())
            .field("state", &self.state().name())
            .finish()
    }
}

/// Wait for the first device fault of a generation and hand it to the session
async fn watch_faults(
    session: Weak<CaptureSession>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<DeviceEvent>,
    stop: StopListener,
) {
    let event = tokio::select! {
        biased;
        _ = stop.stopped() => return,
        event = events.recv() => match event {
            Some(event) => event,
            None => return,
        },
    };
    let Some(session) = session.upgrade() else {
        return;
    };
    // Teardown aborts this watcher, so the fault is handled in its own task
    tokio::spawn(async move { session.handle_fault(generation, event).await });
}

/// Run the frame lane and report it as a fault if it ends while still live
async fn supervise_lane(
    lane: FrameLane,
    source: FrameSource,
    events: mpsc::UnboundedSender<DeviceEvent>,
    stop: StopListener,
) {
    let camera_id = lane.camera.camera_id.clone();
    let generation = lane.generation;
    if AssertUnwindSafe(lane.run(source)).catch_unwind().await.is_err() {
        error!(camera_id = %camera_id, generation, "Frame lane panicked");
    }
    if !stop.is_stopped() {
        let _ = events.send(DeviceEvent::Fault("frame pipeline ended unexpectedly".into()));
    }
}

/// Release every processor once, logging and swallowing failures
async fn release_processors(camera_id: &str, processors: &[AnyProcessor]) {
    for processor in processors {
        match AssertUnwindSafe(processor.release()).catch_unwind().await {
            Ok(Ok(())) => debug!(camera_id, processor = processor.name(), "Processor released"),
            Ok(Err(e)) => warn!(
                camera_id,
                processor = processor.name(),
                error = %e,
                "Processor release failed"
            ),
            Err(_) => warn!(
                camera_id,
                processor = processor.name(),
                "Processor release panicked"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::NormalizedFrame;
    use crate::errors::ProcessorError;
    use crate::frame_processor::{ImageProcessor, OverlayTarget, Processor};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    enum Release {
        Ok,
        Fail,
        Panic,
    }

    struct Releasing {
        mode: Release,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageProcessor for Releasing {
        type Output = ();

        fn name(&self) -> &str {
            "releasing"
        }

        async fn process(
            &self,
            _frame: &NormalizedFrame,
            _overlay: Option<&OverlayTarget>,
        ) -> Result<(), ProcessorError> {
            Ok(())
        }

        async fn release(&self) -> Result<(), ProcessorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Release::Ok => Ok(()),
                Release::Fail => Err(ProcessorError::Failed("busy".into())),
                Release::Panic => panic!("release exploded"),
            }
        }
    }

    fn releasing(mode: Release) -> Processor<Releasing> {
        Processor::new(Releasing {
            mode,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_release_failures_do_not_stop_the_rest() {
        let panicking = releasing(Release::Panic);
        let failing = releasing(Release::Fail);
        let fine = releasing(Release::Ok);
        let processors = vec![panicking.erase(), failing.erase(), fine.erase()];

        release_processors("cam0", &processors).await;

        for processor in [&panicking, &failing, &fine] {
            assert_eq!(processor.get().calls.load(Ordering::SeqCst), 1);
        }
    }
}
