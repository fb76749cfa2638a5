//! Error types for cairn operations

use thiserror::Error;

/// Backend (transport/medium) errors.
///
/// These are latched in a facade's last-error register. Multi-step protocols
/// treat any of them as fatal for the current operation, never as a race.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unreachable during {operation}: {reason}")]
    Unreachable {
        operation: &'static str,
        reason: String,
    },

    #[error("No response from backend during {operation} on {key}")]
    NoResponse { operation: &'static str, key: String },

    #[error("Unexpected value under {key}: {reason}")]
    UnexpectedValue { key: String, reason: String },

    #[error("Backend lock poisoned")]
    LockPoisoned,
}

/// Configuration and call-contract errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{operation} does not support WRITE_ALLOW_SEGMENTS")]
    SegmentationNotAllowed { operation: &'static str },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors converting between cached bytes and typed values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Serialization failed: {reason}")]
    Serialize { reason: String },

    #[error("Deserialization failed: {reason}")]
    Deserialize { reason: String },
}

/// Master error type for all cairn errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Value for {key} is {size} bytes, exceeding the {max} byte limit")]
    SizeExceeded { key: String, size: usize, max: usize },
}

/// Cheap, comparable classification of a [`CacheError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unreachable,
    NoResponse,
    UnexpectedValue,
    Config,
    Codec,
    SizeExceeded,
}

impl CacheError {
    /// Classify this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            CacheError::Backend(BackendError::Unreachable { .. })
            | CacheError::Backend(BackendError::LockPoisoned) => ErrorCode::Unreachable,
            CacheError::Backend(BackendError::NoResponse { .. }) => ErrorCode::NoResponse,
            CacheError::Backend(BackendError::UnexpectedValue { .. }) => {
                ErrorCode::UnexpectedValue
            }
            CacheError::Config(_) => ErrorCode::Config,
            CacheError::Codec(_) => ErrorCode::Codec,
            CacheError::SizeExceeded { .. } => ErrorCode::SizeExceeded,
        }
    }

    /// Whether this error came from the backend (transport or medium).
    pub fn is_backend(&self) -> bool {
        matches!(self, CacheError::Backend(_))
    }
}

/// Result type alias for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type alias for cairn operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
