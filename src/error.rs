//! Error types for fencewatch.
//!
//! All errors are strongly typed using thiserror. Input problems are
//! rejected at the API boundary as [`ValidationError`]s and never touch
//! engine state; runtime conditions surface as [`ExecutionError`]s.

use thiserror::Error;

/// Validation errors that occur during input validation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid coordinate: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate {
        latitude: f64,
        longitude: f64,
    },

    #[error("Invalid region '{id}': {reason}")]
    InvalidRegion {
        id: String,
        reason: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Unknown event kind code {code}")]
    UnknownEventKind {
        code: u8,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors that occur while the engine is running.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Malformed location sample for subject '{subject}': {reason}")]
    MalformedSample {
        subject: String,
        reason: String,
    },

    #[error("Notification delivery failed: {reason}")]
    DeliveryFailed {
        reason: String,
    },

    #[error("Source disconnected: {source_name}")]
    SourceDisconnected {
        source_name: String,
    },

    #[error("Queue '{path}' is full (capacity {capacity})")]
    QueueFull {
        path: String,
        capacity: usize,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },
}

/// Top-level error type for fencewatch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FenceError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl FenceError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for a `DeliveryFailed` execution error.
    #[must_use]
    pub fn delivery_failed(reason: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::DeliveryFailed {
            reason: reason.into(),
        })
    }

    /// Shorthand for a `SourceDisconnected` execution error.
    #[must_use]
    pub fn source_disconnected(source_name: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::SourceDisconnected {
            source_name: source_name.into(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a delivery failure.
    #[must_use]
    pub const fn is_delivery_failed(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::DeliveryFailed { .. }))
    }

    /// Returns true if a subscription was lost and the owner should resubscribe.
    #[must_use]
    pub const fn is_source_disconnected(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::SourceDisconnected { .. }))
    }

    /// Returns true if the caller may reasonably retry the operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::DeliveryFailed { .. }
                    | ExecutionError::QueueFull { .. }
                    | ExecutionError::Timeout { .. }
                    | ExecutionError::SourceDisconnected { .. }
            ),
            Self::Config { .. } | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for fencewatch operations.
pub type FenceResult<T> = Result<T, FenceError>;
