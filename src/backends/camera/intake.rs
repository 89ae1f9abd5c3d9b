// SPDX-License-Identifier: GPL-3.0-only

//! Frame intake between a device's producer and the session's frame lane
//!
//! The intake holds at most one pending frame. What happens when a frame
//! arrives while another is pending or in flight depends on the session's
//! [`BackpressureStrategy`]:
//!
//! - `KeepOnlyLatest`: the pending frame is replaced and counted as dropped.
//!   Producers never wait.
//! - `BlockProducer`: a single permit travels with each frame through the
//!   pipeline. The next submit waits until the previous frame's pass has
//!   finished, so no frame is lost and order is preserved.

use super::types::{BackpressureStrategy, RawFrame};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// The frame lane has shut down and no longer accepts frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeClosed;

impl std::fmt::Display for IntakeClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame intake closed")
    }
}

impl std::error::Error for IntakeClosed {}

/// Counters kept by the intake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeStats {
    /// Frames accepted from the producer
    pub received: u64,
    /// Frames replaced before the lane picked them up
    pub dropped: u64,
}

struct Shared {
    strategy: BackpressureStrategy,
    pending: Mutex<Option<IntakeFrame>>,
    notify: Notify,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    received: AtomicU64,
    dropped: AtomicU64,
}

/// A raw frame taken from the intake
///
/// Under `BlockProducer` it owns the intake permit; dropping it lets the
/// producer submit the next frame.
pub struct IntakeFrame {
    pub frame: RawFrame,
    _permit: Option<OwnedSemaphorePermit>,
}

/// Producer side of the intake, handed to the device when a stream is bound
#[derive(Clone)]
pub struct FrameSink {
    shared: Arc<Shared>,
}

/// Consumer side of the intake, owned by the frame lane
///
/// Dropping it closes the intake and wakes any blocked producer.
pub struct FrameSource {
    shared: Arc<Shared>,
}

/// Create a connected sink and source
pub fn channel(strategy: BackpressureStrategy) -> (FrameSink, FrameSource) {
    let shared = Arc::new(Shared {
        strategy,
        pending: Mutex::new(None),
        notify: Notify::new(),
        permits: Arc::new(Semaphore::new(1)),
        closed: AtomicBool::new(false),
        received: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });
    (
        FrameSink {
            shared: Arc::clone(&shared),
        },
        FrameSource { shared },
    )
}

impl FrameSink {
    pub fn strategy(&self) -> BackpressureStrategy {
        self.shared.strategy
    }

    /// Offer a frame from async code
    pub async fn submit(&self, frame: RawFrame) -> Result<(), IntakeClosed> {
        let permit = match self.shared.strategy {
            BackpressureStrategy::KeepOnlyLatest => None,
            BackpressureStrategy::BlockProducer => Some(
                Arc::clone(&self.shared.permits)
                    .acquire_owned()
                    .await
                    .map_err(|_| IntakeClosed)?,
            ),
        };
        self.shared.put(frame, permit)
    }

    /// Offer a frame from a producer thread
    ///
    /// Must not be called from inside an async task: under `BlockProducer`
    /// it parks the calling thread until the previous frame is processed.
    pub fn blocking_submit(&self, frame: RawFrame) -> Result<(), IntakeClosed> {
        futures::executor::block_on(self.submit(frame))
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> IntakeStats {
        self.shared.stats()
    }
}

impl FrameSource {
    /// Wait for the next frame; `None` once the intake is closed
    pub async fn next(&self) -> Option<IntakeFrame> {
        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(frame) = self.shared.lock_pending().take() {
                return Some(frame);
            }
            self.shared.notify.notified().await;
        }
    }

    pub fn stats(&self) -> IntakeStats {
        self.shared.stats()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.permits.close();
        self.shared.lock_pending().take();
        self.shared.notify.notify_one();
    }
}

impl Shared {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<IntakeFrame>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put(
        &self,
        frame: RawFrame,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<(), IntakeClosed> {
        let sequence = frame.sequence;
        {
            let mut pending = self.lock_pending();
            if self.closed.load(Ordering::Acquire) {
                return Err(IntakeClosed);
            }
            let replaced = pending.replace(IntakeFrame {
                frame,
                _permit: permit,
            });
            if let Some(old) = replaced {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(
                    dropped = old.frame.sequence,
                    sequence, "Replaced pending frame"
                );
            }
        }
        self.received.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        Ok(())
    }

    fn stats(&self) -> IntakeStats {
        IntakeStats {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
