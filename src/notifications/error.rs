//! Notification System Error Types

use std::fmt;

/// Result type for notification operations
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur while routing alerts to sinks
#[derive(Debug, Clone)]
pub enum NotificationError {
    /// A sink with this id is already registered
    SinkAlreadyExists(String),

    /// No sink with this id
    SinkNotFound(String),

    /// Sink reported a failure or panicked
    DeliveryFailed {
        sink_id: String,
        error: String,
    },

    /// Sink did not finish within the delivery timeout
    Timeout {
        sink_id: String,
        duration_ms: u64,
    },

    /// Notifier has been shut down
    SystemShutdown,

    /// Generic error
    Generic(String),
}

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationError::SinkAlreadyExists(id) => {
                write!(f, "Alert sink '{}' already exists", id)
            }
            NotificationError::SinkNotFound(id) => {
                write!(f, "Alert sink '{}' not found", id)
            }
            NotificationError::DeliveryFailed { sink_id, error } => {
                write!(f, "Failed to deliver alert to '{}': {}", sink_id, error)
            }
            NotificationError::Timeout { sink_id, duration_ms } => {
                write!(f, "Delivery to '{}' timed out after {}ms", sink_id, duration_ms)
            }
            NotificationError::SystemShutdown => {
                write!(f, "Alert notifier is shutting down")
            }
            NotificationError::Generic(msg) => {
                write!(f, "Notification error: {}", msg)
            }
        }
    }
}

impl std::error::Error for NotificationError {}

impl NotificationError {
    pub fn sink_already_exists<S: Into<String>>(id: S) -> Self {
        Self::SinkAlreadyExists(id.into())
    }

    pub fn sink_not_found<S: Into<String>>(id: S) -> Self {
        Self::SinkNotFound(id.into())
    }

    /// Create a delivery failed error
    pub fn delivery_failed<S: Into<String>, E: Into<String>>(sink_id: S, error: E) -> Self {
        Self::DeliveryFailed {
            sink_id: sink_id.into(),
            error: error.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(sink_id: S, duration_ms: u64) -> Self {
        Self::Timeout {
            sink_id: sink_id.into(),
            duration_ms,
        }
    }

    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }
}
