//! Read-only view of the `plugins` subtree of the object model.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::permission::SbcPermission;
use crate::registry::{PluginRecord, PluginState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginModel {
    pub name: String,
    pub version: String,
    pub state: PluginState,
    pub bundle: PathBuf,
    pub permissions: Vec<SbcPermission>,
    pub data: BTreeMap<String, String>,
}

impl PluginModel {
    pub fn from_record(record: PluginRecord, data: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            name: record.name,
            version: record.manifest.version,
            state: record.state,
            bundle: record.bundle,
            permissions: record.manifest.permissions,
            data: data.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectModel {
    pub plugins: BTreeMap<String, PluginModel>,
}
