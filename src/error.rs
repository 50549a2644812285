use thiserror::Error;

use crate::command::CommandKind;
use crate::registry::PluginState;

/// Errors reported back to the caller of a command.
///
/// Everything except `StartFailed`/`StopFailed` is returned synchronously by
/// [`Dispatcher::submit`](crate::dispatcher::Dispatcher::submit). Those two are
/// only produced once the supervisor reports completion and are delivered on
/// the event bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("{command} is missing required field '{field}'")]
    MissingField {
        command: CommandKind,
        field: &'static str,
    },
    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },
    #[error("Plugin not found: {plugin}")]
    NotFound { plugin: String },
    #[error("Plugin {plugin} is running and cannot be replaced")]
    AlreadyRunning { plugin: String },
    #[error("Plugin limit reached ({limit} plugins)")]
    PluginLimitReached { limit: usize },
    #[error("Cannot {operation} plugin {plugin} while it is {state}")]
    InvalidState {
        plugin: String,
        state: PluginState,
        operation: &'static str,
    },
    #[error("Plugin {plugin} is already {state}")]
    AlreadyInProgress { plugin: String, state: PluginState },
    #[error("Invalid plugin bundle: {message}")]
    InvalidBundle { message: String },
    #[error("Plugin {plugin} failed to start: {reason}")]
    StartFailed { plugin: String, reason: String },
    #[error("Plugin {plugin} failed to stop: {reason}")]
    StopFailed { plugin: String, reason: String },
}

impl PluginError {
    pub fn not_found(plugin: impl Into<String>) -> Self {
        PluginError::NotFound {
            plugin: plugin.into(),
        }
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        PluginError::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Stable name used as `errorType` on the wire.
    pub fn error_type(&self) -> &'static str {
        match self {
            PluginError::MissingField { .. } => "MissingField",
            PluginError::PermissionDenied { .. } => "PermissionDenied",
            PluginError::NotFound { .. } => "NotFound",
            PluginError::AlreadyRunning { .. } => "AlreadyRunning",
            PluginError::PluginLimitReached { .. } => "PluginLimitReached",
            PluginError::InvalidState { .. } => "InvalidState",
            PluginError::AlreadyInProgress { .. } => "AlreadyInProgress",
            PluginError::InvalidBundle { .. } => "InvalidBundle",
            PluginError::StartFailed { .. } => "StartFailed",
            PluginError::StopFailed { .. } => "StopFailed",
        }
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Top level error for the host process (binary and setup code).
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("Event error: {0}")]
    Event(#[from] crate::event::EventError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

impl HostError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        HostError::Internal(message.into())
    }
}
