//! Plugin data store.
//!
//! The `plugins.<name>.data` subtree of the object model: one partition of
//! string key/value pairs per installed plugin. Each partition lives in its own
//! map entry, so writes to different plugins never contend and a single write
//! is atomic with respect to readers.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{PluginError, PluginResult};

#[derive(Debug, Clone, Default)]
pub struct PluginDataStore {
    partitions: Arc<DashMap<String, HashMap<String, String>>>,
}

impl PluginDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty partition. An existing partition is left untouched.
    pub fn create_partition(&self, plugin: &str) {
        self.partitions.entry(plugin.to_string()).or_default();
    }

    /// Drops a partition and returns its contents.
    pub fn drop_partition(&self, plugin: &str) -> Option<HashMap<String, String>> {
        self.partitions.remove(plugin).map(|(_, data)| data)
    }

    /// Creates or overwrites an entry and returns the previous value.
    pub fn set(&self, plugin: &str, key: &str, value: &str) -> PluginResult<Option<String>> {
        let mut partition = self
            .partitions
            .get_mut(plugin)
            .ok_or_else(|| PluginError::not_found(plugin))?;
        debug!(plugin, key, "set plugin data");
        Ok(partition.insert(key.to_string(), value.to_string()))
    }

    pub fn get(&self, plugin: &str, key: &str) -> Option<String> {
        self.partitions
            .get(plugin)
            .and_then(|partition| partition.get(key).cloned())
    }

    pub fn delete(&self, plugin: &str, key: &str) -> PluginResult<Option<String>> {
        let mut partition = self
            .partitions
            .get_mut(plugin)
            .ok_or_else(|| PluginError::not_found(plugin))?;
        Ok(partition.remove(key))
    }

    /// Copy of a whole partition.
    pub fn partition(&self, plugin: &str) -> Option<HashMap<String, String>> {
        self.partitions.get(plugin).map(|entry| entry.value().clone())
    }
}
