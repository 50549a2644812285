use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumString};

use crate::command::Command;

/// Reason given for every denial.
pub const INSUFFICIENT_PERMISSION: &str = "insufficient permission";

/// Permissions a caller may hold. Plugins declare theirs in the manifest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SbcPermission {
    CommandExecution,
    CodeInterceptionRead,
    CodeInterceptionReadWrite,
    ManagePlugins,
    ServicePlugins,
    ManageUserSessions,
    ObjectModelRead,
    ObjectModelReadWrite,
    RegisterHttpEndpoints,
    FileSystemAccess,
    NetworkAccess,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Principal {
    Administrator,
    Plugin(String),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Administrator => write!(f, "admin"),
            Principal::Plugin(name) => write!(f, "plugin:{}", name),
        }
    }
}

/// Who issued a command, as resolved by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub principal: Principal,
    pub permissions: BTreeSet<SbcPermission>,
}

impl CallerIdentity {
    pub fn administrator() -> Self {
        Self {
            principal: Principal::Administrator,
            permissions: BTreeSet::from([SbcPermission::ManagePlugins]),
        }
    }

    pub fn plugin(name: impl Into<String>) -> Self {
        Self {
            principal: Principal::Plugin(name.into()),
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permission(mut self, permission: SbcPermission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = SbcPermission>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    pub fn has_permission(&self, permission: SbcPermission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn can_manage_plugins(&self) -> bool {
        self.has_permission(SbcPermission::ManagePlugins)
    }

    /// Name of the calling plugin, if the caller is one.
    pub fn plugin_name(&self) -> Option<&str> {
        match &self.principal {
            Principal::Plugin(name) => Some(name.as_str()),
            Principal::Administrator => None,
        }
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.principal.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid caller identity: {0}")]
pub struct ParseIdentityError(String);

impl FromStr for CallerIdentity {
    type Err = ParseIdentityError;

    /// Accepts `admin`, `system` or `plugin:<name>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" | "system" => Ok(CallerIdentity::administrator()),
            _ => match s.strip_prefix("plugin:") {
                Some(name) if !name.is_empty() => Ok(CallerIdentity::plugin(name)),
                _ => Err(ParseIdentityError(s.to_string())),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    fn deny() -> Self {
        Decision::Deny {
            reason: INSUFFICIENT_PERMISSION.to_string(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Decides whether a caller may issue a command. Holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionEvaluator;

impl PermissionEvaluator {
    pub fn authorize(caller: &CallerIdentity, command: &Command) -> Decision {
        if caller.can_manage_plugins() {
            return Decision::Allow;
        }
        match command {
            Command::SetPluginData { plugin, .. }
                if caller.plugin_name() == Some(plugin.as_str()) =>
            {
                Decision::Allow
            }
            _ => Decision::deny(),
        }
    }
}
