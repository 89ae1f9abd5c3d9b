// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera capture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │           Consumers (CLI, tests)             │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────────────────────────┐   │
//! │  │ Camera (directory, sessions, frames) │   │
//! │  └──────────────────┬───────────────────┘   │
//! │                     │ DeviceDirectory       │
//! │  ┌──────────────────┴───────────────────┐   │
//! │  │ Virtual Camera (simulated devices)   │   │
//! │  └──────────────────────────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Capture sessions, frame pipeline and device traits
//! - [`virtual_camera`]: Simulated devices implementing the device traits

pub mod camera;
pub mod virtual_camera;
