//! Monitoring Error Types

use thiserror::Error;

/// Result type for monitoring and alerting operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Error types for metric ingestion, alerting and probing
#[derive(Error, Debug, Clone)]
pub enum MonitorError {
    /// Unknown alert id
    #[error("Alert not found: {alert_id}")]
    AlertNotFound { alert_id: String },

    /// No samples have been ingested for a plugin
    #[error("No metrics recorded for plugin: {plugin_id}")]
    NoMetrics { plugin_id: String },

    /// Malformed metric payload or threshold configuration
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    /// Alert store unreachable or unwritable
    #[error("Transient I/O error: {message}")]
    TransientIo { message: String },

    /// System resource probe failed
    #[error("System probe failed: {message}")]
    ProbeFailed { message: String },
}

impl MonitorError {
    pub fn alert_not_found<S: Into<String>>(alert_id: S) -> Self {
        Self::AlertNotFound { alert_id: alert_id.into() }
    }

    pub fn no_metrics<S: Into<String>>(plugin_id: S) -> Self {
        Self::NoMetrics { plugin_id: plugin_id.into() }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::ValidationError { message: message.into() }
    }

    pub fn transient_io<S: Into<String>>(message: S) -> Self {
        Self::TransientIo { message: message.into() }
    }

    pub fn probe_failed<S: Into<String>>(message: S) -> Self {
        Self::ProbeFailed { message: message.into() }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        Self::transient_io(err.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(err.to_string())
    }
}
