//! Plugin Error Types
//!
//! Error taxonomy for the plugin control plane: manifest scanning, loading,
//! unloading and route dispatch.

use thiserror::Error;

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

/// Error types for plugin operations
#[derive(Error, Debug, Clone)]
pub enum PluginError {
    /// Unknown plugin id
    #[error("Plugin not found: {plugin_id}")]
    NotFound { plugin_id: String },

    /// Unmet or cyclic dependency
    #[error("Plugin dependency error: {message}")]
    DependencyError { message: String },

    /// Plugin initialisation raised an error or panicked
    #[error("Plugin '{plugin_id}' failed to load: {message}")]
    LoadError { plugin_id: String, message: String },

    /// Malformed manifest or payload
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    /// Manifest store unreachable or unwritable
    #[error("Transient I/O error: {message}")]
    TransientIo { message: String },

    /// Plugin targets an incompatible host API version
    #[error("Version compatibility error: {message}")]
    VersionIncompatible { message: String },

    /// Operation not valid in the plugin's current lifecycle state
    #[error("Invalid plugin state: {message}")]
    InvalidState { message: String },

    /// No mounted route matches a request
    #[error("Route not found: {path}")]
    RouteNotFound { path: String },

    /// Caller lacks a permission the route requires
    #[error("Permission denied: missing '{permission}'")]
    PermissionDenied { permission: String },
}

impl PluginError {
    /// Create a plugin not found error
    pub fn not_found<S: Into<String>>(plugin_id: S) -> Self {
        Self::NotFound { plugin_id: plugin_id.into() }
    }

    /// Create a dependency error
    pub fn dependency_error<S: Into<String>>(message: S) -> Self {
        Self::DependencyError { message: message.into() }
    }

    /// Create a load error
    pub fn load_error<S: Into<String>, M: Into<String>>(plugin_id: S, message: M) -> Self {
        Self::LoadError { plugin_id: plugin_id.into(), message: message.into() }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::ValidationError { message: message.into() }
    }

    /// Create a transient I/O error
    pub fn transient_io<S: Into<String>>(message: S) -> Self {
        Self::TransientIo { message: message.into() }
    }

    /// Create a version incompatible error
    pub fn version_incompatible<S: Into<String>>(message: S) -> Self {
        Self::VersionIncompatible { message: message.into() }
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState { message: message.into() }
    }

    /// Create a route not found error
    pub fn route_not_found<S: Into<String>>(path: S) -> Self {
        Self::RouteNotFound { path: path.into() }
    }

    /// Create a permission denied error
    pub fn permission_denied<S: Into<String>>(permission: S) -> Self {
        Self::PermissionDenied { permission: permission.into() }
    }

    /// Check if retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self,
            PluginError::TransientIo { .. } |
            PluginError::LoadError { .. } |
            PluginError::DependencyError { .. }
        )
    }

    /// Check if error stems from manifest content
    pub fn is_manifest_error(&self) -> bool {
        matches!(self,
            PluginError::ValidationError { .. } |
            PluginError::VersionIncompatible { .. }
        )
    }
}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        PluginError::transient_io(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        PluginError::validation(format!("JSON error: {}", err))
    }
}
