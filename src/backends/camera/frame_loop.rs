// SPDX-License-Identifier: GPL-3.0-only
//! Capture loop threads and generation stop signals
//!
//! Device producers run their frame loops on dedicated threads managed by
//! [`CaptureLoopController`]. Async work belonging to one session generation
//! (the frame lane, control commands, the fault watcher) observes a
//! [`StopListener`] instead, so a single [`StopSignal::trigger`] winds all of
//! it down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Action returned by the capture loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a capture loop running in a separate thread
///
/// The closure is called repeatedly until it returns [`LoopAction::Stop`] or
/// [`stop`](Self::stop) is called. Dropping the controller stops the loop.
pub struct CaptureLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoopController {
    /// Start a new capture loop in a separate thread
    pub fn start<F>(name: &str, mut loop_fn: F) -> Self
    where
        F: FnMut(&AtomicBool) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, "Starting capture loop");

        let thread_handle = thread::spawn(move || {
            debug!(name = %thread_name, "Capture loop thread started");

            while !thread_stop.load(Ordering::SeqCst) {
                if loop_fn(&thread_stop) == LoopAction::Stop {
                    debug!(name = %thread_name, "Loop requested stop");
                    break;
                }
            }

            info!(name = %thread_name, "Capture loop thread exiting");
        });

        Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        }
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting for it
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Signal the loop to stop and let the thread finish on its own
    pub fn detach(mut self) {
        self.request_stop();
        if self.thread_handle.take().is_some() {
            debug!(name = %self.name, "Capture loop detached");
        }
    }

    /// Wait for the thread to finish without sending stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Capture loop thread finished");
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

/// Sleep for `duration` in short slices, returning early once `stop` is set
///
/// Returns `false` if the sleep was cut short.
pub fn sleep_unless_stopped(stop: &AtomicBool, duration: std::time::Duration) -> bool {
    const SLICE: std::time::Duration = std::time::Duration::from_millis(5);
    let deadline = std::time::Instant::now() + duration;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = std::time::Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SLICE.min(deadline - now));
    }
}

/// One-shot stop signal owned by a session generation
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(false),
        }
    }

    /// Fire the signal; later calls have no further effect
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn listener(&self) -> StopListener {
        StopListener {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of a [`StopSignal`]
///
/// A listener whose signal was dropped counts as stopped.
#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
}

impl StopListener {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once the signal fires
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn test_basic_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start("test-loop", move |_| {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            if count >= 10 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        });

        controller.join();

        assert_eq!(counter.load(Ordering::SeqCst), 11); // 0-10 inclusive
    }

    #[test]
    fn test_stop_interrupts_sleep() {
        let mut controller = CaptureLoopController::start("test-sleep", |stop| {
            sleep_unless_stopped(stop, Duration::from_secs(60));
            LoopAction::Continue
        });

        thread::sleep(Duration::from_millis(20));
        assert!(controller.is_running());

        let begin = std::time::Instant::now();
        controller.stop();
        assert!(begin.elapsed() < Duration::from_secs(5));
        assert!(!controller.is_running());
    }

    #[test]
    fn test_detach_does_not_wait_for_thread() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let (exited_tx, exited_rx) = std::sync::mpsc::channel::<()>();
        let controller = CaptureLoopController::start("test-detach", move |stop| {
            // Parked like a producer blocked on a full intake
            let _ = release_rx.recv();
            if stop.load(Ordering::SeqCst) {
                let _ = exited_tx.send(());
            }
            LoopAction::Continue
        });

        let begin = std::time::Instant::now();
        controller.detach();
        assert!(begin.elapsed() < Duration::from_secs(1));

        release_tx.send(()).unwrap();
        exited_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[tokio::test]
    async fn test_stop_signal_reaches_listeners() {
        let signal = StopSignal::new();
        let listener = signal.listener();
        assert!(!listener.is_stopped());

        let waiter = tokio::spawn({
            let listener = listener.clone();
            async move { listener.stopped().await }
        });

        signal.trigger();
        waiter.await.unwrap();
        assert!(listener.is_stopped());
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_dropped_signal_counts_as_stopped() {
        let signal = StopSignal::new();
        let listener = signal.listener();
        drop(signal);

        assert!(listener.is_stopped());
        listener.stopped().await;
    }
}
