// SPDX-License-Identifier: GPL-3.0-only

//! Capture session lifecycle states
//!
//! ```text
//!            start(cfg)                 stream bound
//!   Idle ───────────────▶ Starting(cfg) ────────────▶ Started(cfg)
//!    ▲                        │                          │    │
//!    │                        │ open/bind failure        │    │ device fault
//!    │                        ▼                          │    ▼
//!    │              ConfiguredError(cfg, e) ◀────────────┼────┘
//!    │                                                   │ stop()
//!    └──────────────────── Stopping(cfg) ◀───────────────┘
//! ```
//!
//! `Error(e)` is used for faults that arrive with no configuration context.

use super::types::SessionConfig;
use crate::errors::CameraError;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureState {
    Idle,
    Starting(Arc<SessionConfig>),
    /// Carries the configuration with the resolution the device actually bound
    Started(Arc<SessionConfig>),
    Stopping(Arc<SessionConfig>),
    Error(CameraError),
    ConfiguredError(Arc<SessionConfig>, CameraError),
}

impl CaptureState {
    /// Error state for a failure, keeping the configuration when there is one
    pub fn failed(config: Option<Arc<SessionConfig>>, cause: CameraError) -> Self {
        match config {
            Some(config) => CaptureState::ConfiguredError(config, cause),
            None => CaptureState::Error(cause),
        }
    }

    pub fn config(&self) -> Option<&Arc<SessionConfig>> {
        match self {
            CaptureState::Starting(c)
            | CaptureState::Started(c)
            | CaptureState::Stopping(c)
            | CaptureState::ConfiguredError(c, _) => Some(c),
            CaptureState::Idle | CaptureState::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CameraError> {
        match self {
            CaptureState::Error(e) | CaptureState::ConfiguredError(_, e) => Some(e),
            _ => None,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, CaptureState::Started(_))
    }

    /// Idle or one of the error states
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaptureState::Idle | CaptureState::Error(_) | CaptureState::ConfiguredError(..)
        )
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Starting(_) => "starting",
            CaptureState::Started(_) => "started",
            CaptureState::Stopping(_) => "stopping",
            CaptureState::Error(_) => "error",
            CaptureState::ConfiguredError(..) => "configured-error",
        }
    }

    /// Whether `next` may directly follow `self` on a session's state stream
    pub fn can_transition_to(&self, next: &CaptureState) -> bool {
        use CaptureState::*;
        match (self, next) {
            (Idle | Error(_) | ConfiguredError(..), Starting(_)) => true,
            (Starting(_), Started(_) | ConfiguredError(..)) => true,
            (Started(_), Stopping(_) | ConfiguredError(..) | Error(_)) => true,
            (Stopping(_), Idle) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureState::Started(c) => write!(f, "started ({})", c.resolution),
            CaptureState::Error(e) | CaptureState::ConfiguredError(_, e) => {
                write!(f, "{}: {}", self.name(), e)
            }
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_keeps_config() {
        let config = Arc::new(SessionConfig::default());
        let state = CaptureState::failed(Some(config.clone()), CameraError::PermissionDenied);
        assert_eq!(state.config(), Some(&config));
        assert_eq!(state.error(), Some(&CameraError::PermissionDenied));
        assert!(state.is_terminal());

        let bare = CaptureState::failed(None, CameraError::DeviceFault("gone".into()));
        assert!(matches!(bare, CaptureState::Error(_)));
    }

    #[test]
    fn test_transition_table() {
        let cfg = Arc::new(SessionConfig::default());
        let started = CaptureState::Started(cfg.clone());
        assert!(CaptureState::Idle.can_transition_to(&CaptureState::Starting(cfg.clone())));
        assert!(started.can_transition_to(&CaptureState::Stopping(cfg.clone())));
        assert!(!CaptureState::Idle.can_transition_to(&started));
        assert!(!started.can_transition_to(&CaptureState::Idle));
    }
}
