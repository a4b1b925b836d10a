//! Error handling module for the composition HAL

use ::core::fmt;
use alloc::string::{String, ToString};

/// Common error type used throughout the composition HAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// HAL format word with no hardware equivalent
    UnsupportedFormat(u32),
    /// No free pipe left on a display bank
    ResourceExhausted(String),
    /// The device refused a request
    DeviceRejected(String),
    /// Destination outside the display, or crop outside the source
    InvalidGeometry(String),
    /// Invalid argument
    InvalidArgument(String),
    /// Operation not valid in the current state
    InvalidState(String),
    /// Requested heap or feature not available on this platform
    NotSupported(String),
    /// Out of memory
    OutOfMemory,
    /// Configuration error
    ConfigError(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedFormat(format) => write!(f, "Unsupported format: {:#x}", format),
            Error::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            Error::DeviceRejected(msg) => write!(f, "Device rejected: {}", msg),
            Error::InvalidGeometry(msg) => write!(f, "Invalid geometry: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::NotSupported(msg) => write!(f, "Not supported: {}", msg),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl ::core::error::Error for Error {}

/// Result type for operations that can fail
pub type Result<T> = ::core::result::Result<T, Error>;

/// Creates a new device rejection error
pub fn device_rejected(msg: &str) -> Error {
    Error::DeviceRejected(msg.to_string())
}

/// Creates a new invalid geometry error
pub fn invalid_geometry(msg: &str) -> Error {
    Error::InvalidGeometry(msg.to_string())
}

/// Creates a new invalid state error
pub fn invalid_state(msg: &str) -> Error {
    Error::InvalidState(msg.to_string())
}

/// Creates a new invalid argument error
pub fn invalid_argument(msg: &str) -> Error {
    Error::InvalidArgument(msg.to_string())
}

/// Creates a new resource exhaustion error
pub fn resource_exhausted(msg: &str) -> Error {
    Error::ResourceExhausted(msg.to_string())
}
