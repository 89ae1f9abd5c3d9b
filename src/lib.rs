// SPDX-License-Identifier: MPL-2.0

//! Camera Vision - concurrent camera capture and frame analysis
//!
//! This library opens camera streams, normalizes their frames, runs a set of
//! pluggable analyzers on every frame concurrently and publishes the combined
//! result as a snapshot.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Capture sessions, the camera directory and device backends
//! - [`frame_processor`]: Processor contract, results and built-in processors
//! - [`config`]: User configuration handling
//! - [`constants`]: Defaults and presets
//! - [`errors`]: Error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use camera_vision::backends::camera::{CameraDirectory, SessionConfig};
//! use camera_vision::backends::virtual_camera::VirtualCameraDirectory;
//! use camera_vision::frame_processor::{LumaStats, Processor};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let directory = CameraDirectory::new(Arc::new(VirtualCameraDirectory::default()));
//! let luma = Processor::new(LumaStats::default());
//! let session = directory.get_camera("virtual0").await.unwrap();
//! session
//!     .start(SessionConfig::default().with_processor(&luma))
//!     .await;
//! if let Some(snapshot) = session.snapshot() {
//!     println!("{:?}", snapshot.results.get(&luma));
//! }
//! directory.stop_all_cameras().await;
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod frame_processor;

// Re-export commonly used types
pub use backends::camera::{CameraDirectory, CaptureSession, CaptureState, SessionConfig};
pub use config::Config;
pub use errors::{AppError, AppResult, CameraError};
pub use frame_processor::{ImageProcessor, Processor, ProcessingResults};
