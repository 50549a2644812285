//! # Plugin Registry
//!
//! Authoritative table of known plugins and their lifecycle state.
//!
//! ```text
//!             install          begin_start         finish_start(ok)
//!   (absent) ─────────▶ Installed ─────────▶ Starting ─────────▶ Running
//!                          ▲  ▲                  │                  │
//!                          │  └── finish_start(err)                 │ begin_stop
//!                          │                                        ▼
//!                 install  │       begin_start                  Stopping
//!                (upgrade) └─── Stopped ◀──────────────────────────┘
//!                                 │         finish_stop(ok)
//!                                 │ uninstall
//!                                 ▼
//!                             (removed)
//! ```
//!
//! Records are only mutated through the operations below. The registry does not
//! serialize callers itself; the dispatcher holds a per-plugin lock around every
//! call, and each operation is a single atomic map update so readers never see
//! a half-applied transition.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use strum::Display;
use tracing::{debug, info};

use crate::bundle::PluginManifest;
use crate::error::{PluginError, PluginResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PluginState {
    Installed,
    Starting,
    Running,
    Stopping,
    Stopped,
    /// Reported for a successful uninstall; never stored.
    Uninstalled,
}

impl PluginState {
    /// States from which a plugin may be started, replaced or removed.
    pub fn is_idle(&self) -> bool {
        matches!(self, PluginState::Installed | PluginState::Stopped)
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self, PluginState::Starting | PluginState::Stopping)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRecord {
    pub name: String,
    pub state: PluginState,
    /// Bundle the plugin was installed (or last upgraded) from
    pub bundle: PathBuf,
    pub manifest: PluginManifest,
    /// Name of the store partition holding this plugin's data
    pub data_partition: String,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// State to fall back to when an in-flight transition fails
    #[serde(skip)]
    stable_state: PluginState,
}

impl PluginRecord {
    fn new(bundle: PathBuf, manifest: PluginManifest) -> Self {
        let now = Utc::now();
        Self {
            name: manifest.name.clone(),
            state: PluginState::Installed,
            bundle,
            data_partition: manifest.name.clone(),
            manifest,
            installed_at: now,
            updated_at: now,
            stable_state: PluginState::Installed,
        }
    }

    fn transition(&mut self, state: PluginState) {
        debug!(plugin = %self.name, from = %self.state, to = %state, "state transition");
        if !state.is_transitioning() {
            self.stable_state = state;
        }
        self.state = state;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallKind {
    Fresh,
    Upgrade,
}

#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    records: Arc<DashMap<String, PluginRecord>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a new plugin or replaces the bundle of an idle one.
    ///
    /// `max_plugins == 0` disables the limit. The limit is checked without a
    /// global lock, so concurrent installs of distinct names may overshoot it.
    #[tracing::instrument(skip(self, manifest), fields(plugin = %manifest.name), level = "debug")]
    pub fn install(
        &self,
        bundle: PathBuf,
        manifest: PluginManifest,
        max_plugins: usize,
    ) -> PluginResult<InstallKind> {
        let name = manifest.name.clone();
        if max_plugins > 0
            && !self.records.contains_key(&name)
            && self.records.len() >= max_plugins
        {
            return Err(PluginError::PluginLimitReached { limit: max_plugins });
        }

        match self.records.entry(name.clone()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if !record.state.is_idle() {
                    return Err(PluginError::AlreadyRunning { plugin: name });
                }
                record.bundle = bundle;
                record.manifest = manifest;
                record.transition(PluginState::Installed);
                info!(plugin = %name, "plugin upgraded");
                Ok(InstallKind::Upgrade)
            }
            Entry::Vacant(entry) => {
                entry.insert(PluginRecord::new(bundle, manifest));
                info!(plugin = %name, "plugin installed");
                Ok(InstallKind::Fresh)
            }
        }
    }

    /// Records the intent to start. Returns the record as handed to the supervisor.
    pub fn begin_start(&self, name: &str) -> PluginResult<PluginRecord> {
        let mut record = self
            .records
            .get_mut(name)
            .ok_or_else(|| PluginError::not_found(name))?;
        let state = record.state;
        match state {
            _ if state.is_idle() => {
                record.transition(PluginState::Starting);
                Ok(record.clone())
            }
            PluginState::Starting => Err(PluginError::AlreadyInProgress {
                plugin: name.to_string(),
                state: PluginState::Starting,
            }),
            _ => Err(PluginError::InvalidState {
                plugin: name.to_string(),
                state,
                operation: "start",
            }),
        }
    }

    /// Completes a start. On failure the plugin returns to the state it was
    /// started from.
    pub fn finish_start(&self, name: &str, succeeded: bool) -> PluginResult<PluginState> {
        let mut record = self
            .records
            .get_mut(name)
            .ok_or_else(|| PluginError::not_found(name))?;
        if record.state != PluginState::Starting {
            return Err(PluginError::InvalidState {
                plugin: name.to_string(),
                state: record.state,
                operation: "finish starting",
            });
        }
        let next = if succeeded {
            PluginState::Running
        } else {
            record.stable_state
        };
        record.transition(next);
        Ok(next)
    }

    pub fn begin_stop(&self, name: &str) -> PluginResult<PluginRecord> {
        let mut record = self
            .records
            .get_mut(name)
            .ok_or_else(|| PluginError::not_found(name))?;
        let state = record.state;
        match state {
            PluginState::Running => {
                record.transition(PluginState::Stopping);
                Ok(record.clone())
            }
            PluginState::Stopping => Err(PluginError::AlreadyInProgress {
                plugin: name.to_string(),
                state: PluginState::Stopping,
            }),
            _ => Err(PluginError::InvalidState {
                plugin: name.to_string(),
                state,
                operation: "stop",
            }),
        }
    }

    /// Completes a stop. On failure the plugin is still running.
    pub fn finish_stop(&self, name: &str, succeeded: bool) -> PluginResult<PluginState> {
        let mut record = self
            .records
            .get_mut(name)
            .ok_or_else(|| PluginError::not_found(name))?;
        if record.state != PluginState::Stopping {
            return Err(PluginError::InvalidState {
                plugin: name.to_string(),
                state: record.state,
                operation: "finish stopping",
            });
        }
        let next = if succeeded {
            PluginState::Stopped
        } else {
            PluginState::Running
        };
        record.transition(next);
        Ok(next)
    }

    /// Removes an idle plugin and returns its final record.
    pub fn uninstall(&self, name: &str) -> PluginResult<PluginRecord> {
        if let Some((_, record)) = self.records.remove_if(name, |_, r| r.state.is_idle()) {
            info!(plugin = %name, "plugin uninstalled");
            return Ok(record);
        }
        match self.state(name) {
            None => Err(PluginError::not_found(name)),
            Some(state) => Err(PluginError::InvalidState {
                plugin: name.to_string(),
                state,
                operation: "uninstall",
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<PluginRecord> {
        self.records.get(name).map(|entry| entry.value().clone())
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.records.get(name).map(|entry| entry.state)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of every record, sorted by name. Tolerates concurrent mutation:
    /// each record is read atomically, the set as a whole is not.
    pub fn snapshot(&self) -> Vec<PluginRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn names_in_state(&self, state: PluginState) -> Vec<String> {
        self.records
            .iter()
            .filter(|entry| entry.state == state)
            .map(|entry| entry.key().clone())
            .collect()
    }
}
