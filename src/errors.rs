// SPDX-License-Identifier: GPL-3.0-only

//! Error types for camera capture and frame analysis
//!
//! Only [`CameraError`] ever reaches a session's state stream. The other
//! errors are scoped to one frame, one processor or one control call and
//! are logged or turned into a `false` return where they occur.

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Camera-related errors
    Camera(CameraError),
    /// Configuration errors
    Config(String),
    /// Filesystem errors
    Io(String),
    /// Generic error with message
    Other(String),
}

/// Errors visible to observers of a capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// The platform refused access to the camera
    PermissionDenied,
    /// The device could not be opened or the stream could not be bound
    DeviceOpenFailure(String),
    /// The device failed while a stream was running
    DeviceFault(String),
}

impl CameraError {
    /// Normalize an error raised while opening a device or building its pipeline
    pub fn from_open(err: DeviceError) -> Self {
        match err {
            DeviceError::PermissionDenied => CameraError::PermissionDenied,
            DeviceError::Fault(msg) => CameraError::DeviceFault(msg),
            other => CameraError::DeviceOpenFailure(other.to_string()),
        }
    }
}

/// Errors reported by platform device collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    PermissionDenied,
    NotFound(String),
    DeviceBusy(String),
    Fault(String),
    Other(String),
}

/// Failure of one processor on one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The processor returned an error
    Failed(String),
    /// The processor task panicked
    Panicked(String),
    /// The processor task was cancelled before completing
    Cancelled,
}

/// Failure to normalize one raw frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// Width or height is zero, or the stride is shorter than a row
    InvalidDimensions { width: u32, height: u32, stride: u32 },
    /// Buffer is too small for the declared geometry
    BufferTooSmall { expected: usize, actual: usize },
    /// Planar source with odd dimensions
    UnsupportedGeometry(String),
    /// The converter panicked on this frame
    Panicked(String),
}

/// Failure of one device-control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// The device rejected the command
    Rejected(String),
    /// The argument is out of range for this control
    InvalidArgument(String),
    /// The session generation ended before the command completed
    Cancelled,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Camera(e) => write!(f, "Camera error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Io(msg) => write!(f, "I/O error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::PermissionDenied => write!(f, "Camera permission denied"),
            CameraError::DeviceOpenFailure(msg) => write!(f, "Failed to open camera: {}", msg),
            CameraError::DeviceFault(msg) => write!(f, "Camera fault: {}", msg),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::PermissionDenied => write!(f, "Permission denied"),
            DeviceError::NotFound(id) => write!(f, "Camera not found: {}", id),
            DeviceError::DeviceBusy(id) => write!(f, "Camera is busy: {}", id),
            DeviceError::Fault(msg) => write!(f, "Device fault: {}", msg),
            DeviceError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorError::Failed(msg) => write!(f, "Processor failed: {}", msg),
            ProcessorError::Panicked(msg) => write!(f, "Processor panicked: {}", msg),
            ProcessorError::Cancelled => write!(f, "Processor cancelled"),
        }
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::InvalidDimensions {
                width,
                height,
                stride,
            } => write!(
                f,
                "Invalid frame dimensions {}x{} (stride {})",
                width, height, stride
            ),
            ConversionError::BufferTooSmall { expected, actual } => write!(
                f,
                "Frame buffer too small: expected {} bytes, got {}",
                expected, actual
            ),
            ConversionError::UnsupportedGeometry(msg) => {
                write!(f, "Unsupported frame geometry: {}", msg)
            }
            ConversionError::Panicked(msg) => write!(f, "Converter panicked: {}", msg),
        }
    }
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Rejected(msg) => write!(f, "Control command rejected: {}", msg),
            ControlError::InvalidArgument(msg) => write!(f, "Invalid control argument: {}", msg),
            ControlError::Cancelled => write!(f, "Control command cancelled"),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for CameraError {}
impl std::error::Error for DeviceError {}
impl std::error::Error for ProcessorError {}
impl std::error::Error for ConversionError {}
impl std::error::Error for ControlError {}

impl From<CameraError> for AppError {
    fn from(err: CameraError) -> Self {
        AppError::Camera(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_errors_are_normalized() {
        assert_eq!(
            CameraError::from_open(DeviceError::PermissionDenied),
            CameraError::PermissionDenied
        );
        assert!(matches!(
            CameraError::from_open(DeviceError::DeviceBusy("cam0".into())),
            CameraError::DeviceOpenFailure(msg) if msg.contains("cam0")
        ));
        assert!(matches!(
            CameraError::from_open(DeviceError::NotFound("cam9".into())),
            CameraError::DeviceOpenFailure(_)
        ));
    }

    #[test]
    fn test_display_includes_context() {
        let err = AppError::from(CameraError::DeviceFault("usb reset".into()));
        assert_eq!(err.to_string(), "Camera error: Camera fault: usb reset");
    }
}
