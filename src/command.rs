//! # Command Model
//!
//! Typed, immutable commands a client submits to the [`Dispatcher`](crate::dispatcher::Dispatcher).
//!
//! Each variant is built through its named constructor, so the discriminant
//! reported by [`Command::kind`] always matches the constructor used. Business
//! rules (plugin existence, permissions, lifecycle guards) are not checked here;
//! [`Command::validate`] only verifies that required fields are present.
//!
//! ## Wire shape
//!
//! Commands travel as JSON objects tagged by `command` with camelCase fields:
//!
//! ```rust
//! use plugin_control::command::Command;
//!
//! let cmd: Command = serde_json::from_str(
//!     r#"{"command":"SetPluginData","plugin":"weather","key":"apiKey","value":"abc123"}"#,
//! ).unwrap();
//! assert_eq!(cmd, Command::set_plugin_data("weather", "apiKey", "abc123"));
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{AsRefStr, Display, EnumString};

use crate::error::{PluginError, PluginResult};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
pub enum CommandKind {
    InstallPlugin,
    StartPlugin,
    StopPlugin,
    UninstallPlugin,
    SetPluginData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all_fields = "camelCase")]
pub enum Command {
    /// Install or upgrade a plugin from a bundle.
    InstallPlugin {
        /// Absolute path to the plugin bundle
        plugin_file: PathBuf,
    },
    StartPlugin {
        plugin: String,
    },
    StopPlugin {
        plugin: String,
    },
    UninstallPlugin {
        plugin: String,
    },
    /// Set custom plugin data in the object model.
    ///
    /// A plugin may only update its own data unless it holds
    /// [`SbcPermission::ManagePlugins`](crate::permission::SbcPermission::ManagePlugins).
    SetPluginData {
        plugin: String,
        key: String,
        value: String,
    },
}

impl Command {
    pub fn install_plugin(plugin_file: impl Into<PathBuf>) -> Self {
        Command::InstallPlugin {
            plugin_file: plugin_file.into(),
        }
    }

    pub fn start_plugin(plugin: impl Into<String>) -> Self {
        Command::StartPlugin {
            plugin: plugin.into(),
        }
    }

    pub fn stop_plugin(plugin: impl Into<String>) -> Self {
        Command::StopPlugin {
            plugin: plugin.into(),
        }
    }

    pub fn uninstall_plugin(plugin: impl Into<String>) -> Self {
        Command::UninstallPlugin {
            plugin: plugin.into(),
        }
    }

    pub fn set_plugin_data(
        plugin: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Command::SetPluginData {
            plugin: plugin.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::InstallPlugin { .. } => CommandKind::InstallPlugin,
            Command::StartPlugin { .. } => CommandKind::StartPlugin,
            Command::StopPlugin { .. } => CommandKind::StopPlugin,
            Command::UninstallPlugin { .. } => CommandKind::UninstallPlugin,
            Command::SetPluginData { .. } => CommandKind::SetPluginData,
        }
    }

    /// The plugin this command targets. `None` for installs, whose name is
    /// only known once the bundle has been resolved.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Command::InstallPlugin { .. } => None,
            Command::StartPlugin { plugin }
            | Command::StopPlugin { plugin }
            | Command::UninstallPlugin { plugin }
            | Command::SetPluginData { plugin, .. } => Some(plugin.as_str()),
        }
    }

    pub fn plugin_file(&self) -> Option<&Path> {
        match self {
            Command::InstallPlugin { plugin_file } => Some(plugin_file.as_path()),
            _ => None,
        }
    }

    /// Checks that every required field is populated.
    pub fn validate(&self) -> PluginResult<()> {
        let missing = |field: &'static str| PluginError::MissingField {
            command: self.kind(),
            field,
        };
        match self {
            Command::InstallPlugin { plugin_file } => {
                if plugin_file.as_os_str().is_empty() {
                    return Err(missing("pluginFile"));
                }
            }
            Command::StartPlugin { plugin }
            | Command::StopPlugin { plugin }
            | Command::UninstallPlugin { plugin } => {
                if plugin.is_empty() {
                    return Err(missing("plugin"));
                }
            }
            Command::SetPluginData { plugin, key, .. } => {
                if plugin.is_empty() {
                    return Err(missing("plugin"));
                }
                if key.is_empty() {
                    return Err(missing("key"));
                }
            }
        }
        Ok(())
    }
}
