//! Error types for hardware operations.
//!
//! Driver failures are reported through [`HardwareError`]. The
//! [`HardwareManager`](crate::manager::HardwareManager) never lets these
//! escape as panics; every high-level operation hands them back as a
//! `Result` value for the caller to interpret.

use crate::types::DeviceKind;

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during hardware device operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Device communication error.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Invalid data received from device.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Device configuration error.
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Device failed its health check.
    #[error("Health check failed: {message}")]
    Unhealthy { message: String },

    /// The manager worker for a device is gone (shutdown or crashed).
    #[error("{kind} worker unavailable")]
    WorkerUnavailable { kind: DeviceKind },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    /// Create a new invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a new health check failure.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::Unhealthy {
            message: message.into(),
        }
    }

    /// Create a new worker unavailable error.
    pub fn worker_unavailable(kind: DeviceKind) -> Self {
        Self::WorkerUnavailable { kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_error() {
        let error = HardwareError::disconnected("relay bank");
        assert!(matches!(error, HardwareError::Disconnected { .. }));
        assert_eq!(error.to_string(), "Device disconnected: relay bank");
    }

    #[test]
    fn test_timeout_error() {
        let error = HardwareError::timeout(3000);
        assert_eq!(error.to_string(), "Operation timeout after 3000ms");
    }

    #[test]
    fn test_communication_error() {
        let error = HardwareError::communication("CRC mismatch");
        assert_eq!(error.to_string(), "Communication error: CRC mismatch");
    }

    #[test]
    fn test_worker_unavailable_names_device() {
        let error = HardwareError::worker_unavailable(DeviceKind::DoorSensor);
        assert_eq!(error.to_string(), "door sensor worker unavailable");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error: HardwareError = io.into();
        assert!(matches!(error, HardwareError::Io(_)));
    }
}
