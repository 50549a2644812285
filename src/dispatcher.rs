//! # Command Dispatcher
//!
//! Single entry point for plugin-control commands. Every submission goes
//! through the same pipeline:
//!
//! ```text
//! validate ─▶ authorize ─▶ (resolve bundle) ─▶ lock plugin ─▶ apply ─▶ publish
//!                                                                 │
//!                                    Start/Stop: spawn completion ┘
//! ```
//!
//! Commands naming the same plugin are serialized by a per-plugin mutex;
//! commands for different plugins never wait on each other. Start and stop
//! return as soon as `Starting`/`Stopping` is recorded. A completion task then
//! awaits the [`ProcessSupervisor`] (bounded by the configured timeout),
//! re-acquires the plugin lock, finalizes the state and publishes the outcome.

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bundle::BundleResolver;
use crate::command::Command;
use crate::config::HostConfig;
use crate::error::{PluginError, PluginResult};
use crate::event::{EventBus, EventReceiver, LifecycleEvent, LifecycleEventKind};
use crate::model::{ObjectModel, PluginModel};
use crate::permission::{CallerIdentity, Decision, PermissionEvaluator};
use crate::registry::{InstallKind, PluginRecord, PluginRegistry, PluginState};
use crate::store::PluginDataStore;
use crate::supervisor::{ProcessSupervisor, SupervisorError};

/// Synchronous result of an accepted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum CommandOutcome {
    /// State recorded by a lifecycle command. `Starting`/`Stopping` mean the
    /// transition is still in flight.
    Lifecycle { plugin: String, state: PluginState },
    DataSet {
        plugin: String,
        key: String,
        previous: Option<String>,
    },
}

impl CommandOutcome {
    pub fn plugin(&self) -> &str {
        match self {
            CommandOutcome::Lifecycle { plugin, .. } | CommandOutcome::DataSet { plugin, .. } => {
                plugin
            }
        }
    }

    pub fn state(&self) -> Option<PluginState> {
        match self {
            CommandOutcome::Lifecycle { state, .. } => Some(*state),
            CommandOutcome::DataSet { .. } => None,
        }
    }

    fn lifecycle(plugin: impl Into<String>, state: PluginState) -> Self {
        CommandOutcome::Lifecycle {
            plugin: plugin.into(),
            state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Start,
    Stop,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: PluginRegistry,
    store: PluginDataStore,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    in_flight: Arc<DashMap<String, JoinHandle<()>>>,
    event_bus: Arc<EventBus>,
    bundles: Arc<dyn BundleResolver>,
    supervisor: Arc<dyn ProcessSupervisor>,
    config: HostConfig,
}

impl Dispatcher {
    pub fn new(
        config: HostConfig,
        bundles: Arc<dyn BundleResolver>,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Self {
        Self {
            registry: PluginRegistry::new(),
            store: PluginDataStore::new(),
            locks: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            bundles,
            supervisor,
            config,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    /// Validates, authorizes and applies a command on behalf of `caller`.
    ///
    /// Rejected commands leave no trace in the registry or store.
    #[tracing::instrument(
        skip(self, caller, command),
        fields(
            submission = %uuid::Uuid::new_v4(),
            caller = %caller,
            command = %command.kind(),
            plugin = command.plugin().unwrap_or_default(),
        )
    )]
    pub async fn submit(
        &self,
        caller: &CallerIdentity,
        command: Command,
    ) -> PluginResult<CommandOutcome> {
        command.validate()?;
        if let Decision::Deny { reason } = PermissionEvaluator::authorize(caller, &command) {
            warn!(%reason, "command rejected");
            return Err(PluginError::PermissionDenied { reason });
        }

        let target = command.plugin().map(str::to_string);
        let result = match command {
            Command::InstallPlugin { plugin_file } => self.install(plugin_file).await,
            Command::StartPlugin { plugin } => self.start(&plugin).await,
            Command::StopPlugin { plugin } => self.stop(&plugin).await,
            Command::UninstallPlugin { plugin } => self.uninstall(&plugin).await,
            Command::SetPluginData { plugin, key, value } => {
                self.set_data(&plugin, key, &value).await
            }
        };

        // Lock entries are only kept for plugins that exist.
        if let Some(plugin) = target {
            self.prune_lock(&plugin);
        }

        match &result {
            Ok(outcome) => debug!(?outcome, "command applied"),
            Err(e) => info!(error = %e, "command failed"),
        }
        result
    }

    async fn install(&self, plugin_file: PathBuf) -> PluginResult<CommandOutcome> {
        let manifest = self.bundles.resolve(&plugin_file).await?;
        let name = manifest.name.clone();

        let installed = {
            let _guard = self.lock(&name).await;
            self.registry
                .install(plugin_file, manifest, self.config.max_plugins)
                .map(|kind| {
                    self.store.create_partition(&name);
                    self.publish(
                        &name,
                        LifecycleEventKind::Installed {
                            upgrade: kind == InstallKind::Upgrade,
                        },
                    );
                })
        };
        // A rejected fresh install leaves no lock entry behind.
        self.prune_lock(&name);
        installed?;
        Ok(CommandOutcome::lifecycle(name, PluginState::Installed))
    }

    async fn start(&self, plugin: &str) -> PluginResult<CommandOutcome> {
        let _guard = self.lock(plugin).await;
        let record = self.registry.begin_start(plugin)?;
        self.publish(plugin, LifecycleEventKind::Starting);
        self.spawn_completion(Transition::Start, record);
        Ok(CommandOutcome::lifecycle(plugin, PluginState::Starting))
    }

    async fn stop(&self, plugin: &str) -> PluginResult<CommandOutcome> {
        let _guard = self.lock(plugin).await;
        let record = self.registry.begin_stop(plugin)?;
        self.publish(plugin, LifecycleEventKind::Stopping);
        self.spawn_completion(Transition::Stop, record);
        Ok(CommandOutcome::lifecycle(plugin, PluginState::Stopping))
    }

    async fn uninstall(&self, plugin: &str) -> PluginResult<CommandOutcome> {
        let _guard = self.lock(plugin).await;
        self.registry.uninstall(plugin)?;
        if let Some(data) = self.store.drop_partition(plugin) {
            debug!(plugin, entries = data.len(), "dropped data partition");
        }
        self.in_flight.remove(plugin);
        self.publish(plugin, LifecycleEventKind::Uninstalled);
        Ok(CommandOutcome::lifecycle(plugin, PluginState::Uninstalled))
    }

    async fn set_data(&self, plugin: &str, key: String, value: &str) -> PluginResult<CommandOutcome> {
        let _guard = self.lock(plugin).await;
        if !self.registry.contains(plugin) {
            return Err(PluginError::not_found(plugin));
        }
        let previous = self.store.set(plugin, &key, value)?;
        self.publish(plugin, LifecycleEventKind::DataChanged { key: key.clone() });
        Ok(CommandOutcome::DataSet {
            plugin: plugin.to_string(),
            key,
            previous,
        })
    }

    fn spawn_completion(&self, transition: Transition, record: PluginRecord) {
        let name = record.name.clone();
        let this = self.clone();
        let handle = tokio::spawn(async move { this.complete(transition, record).await });
        // The previous task, if any, is past its finalize step: it held the
        // plugin lock we hold now.
        if let Some(previous) = self.in_flight.insert(name.clone(), handle) {
            if !previous.is_finished() {
                debug!(plugin = %name, "detached completion task still winding down");
            }
        }
    }

    #[tracing::instrument(skip(self, record), fields(plugin = %record.name))]
    async fn complete(&self, transition: Transition, record: PluginRecord) {
        let limit = match transition {
            Transition::Start => self.config.start_timeout,
            Transition::Stop => self.config.stop_timeout,
        };
        let outcome = match transition {
            Transition::Start => tokio::time::timeout(limit, self.supervisor.start(&record)).await,
            Transition::Stop => tokio::time::timeout(limit, self.supervisor.stop(&record)).await,
        }
        .unwrap_or_else(|_| Err(timeout_error(limit)));

        let name = record.name.as_str();
        let _guard = self.lock(name).await;
        let finished = match transition {
            Transition::Start => self.registry.finish_start(name, outcome.is_ok()),
            Transition::Stop => self.registry.finish_stop(name, outcome.is_ok()),
        };
        let state = match finished {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "could not finalize transition");
                return;
            }
        };

        let kind = match (transition, outcome) {
            (Transition::Start, Ok(())) => LifecycleEventKind::Started,
            (Transition::Stop, Ok(())) => LifecycleEventKind::Stopped,
            (Transition::Start, Err(e)) => LifecycleEventKind::StartFailed {
                reason: e.to_string(),
            },
            (Transition::Stop, Err(e)) => LifecycleEventKind::StopFailed {
                reason: e.to_string(),
            },
        };
        match &kind {
            LifecycleEventKind::StartFailed { reason } | LifecycleEventKind::StopFailed { reason } => {
                warn!(%state, %reason, "transition failed")
            }
            _ => info!(%state, "transition completed"),
        }
        self.publish(name, kind);
    }

    async fn lock(&self, plugin: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(plugin.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Drops the lock entry of a plugin that no longer exists, unless someone
    /// else holds or waits on it.
    fn prune_lock(&self, plugin: &str) {
        if !self.registry.contains(plugin) {
            self.locks
                .remove_if(plugin, |_, lock| Arc::strong_count(lock) == 1);
        }
    }

    fn publish(&self, plugin: &str, kind: LifecycleEventKind) {
        if let Err(e) = self.event_bus.publish(LifecycleEvent::new(plugin, kind)) {
            debug!(plugin, error = %e, "event dropped");
        }
    }

    /// Waits for every start/stop completion currently in flight.
    pub async fn wait_for_transitions(&self) {
        let names: Vec<String> = self
            .in_flight
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let handles: Vec<_> = names
            .iter()
            .filter_map(|name| self.in_flight.remove(name).map(|(_, handle)| handle))
            .collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "completion task failed");
            }
        }
    }

    /// Settles in-flight transitions, stops every running plugin and waits for
    /// the stops. Each wait is bounded by `shutdown_timeout`. Returns the
    /// plugins a stop was issued for.
    pub async fn shutdown(&self) -> Vec<String> {
        // Plugins still Starting must reach Running before they can be stopped.
        self.settle("before stopping plugins").await;

        let admin = CallerIdentity::administrator();
        let running = self.registry.names_in_state(PluginState::Running);
        let stops = running
            .iter()
            .map(|name| self.submit(&admin, Command::stop_plugin(name.as_str())));
        let mut stopped = Vec::new();
        for (name, result) in running.iter().zip(join_all(stops).await) {
            match result {
                Ok(_) => stopped.push(name.clone()),
                Err(e) => warn!(plugin = %name, error = %e, "could not stop plugin"),
            }
        }

        self.settle("while stopping plugins").await;
        info!(count = stopped.len(), "shutdown complete");
        stopped
    }

    async fn settle(&self, phase: &str) {
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_transitions())
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                phase, "shutdown timed out with transitions still in flight"
            );
        }
    }

    pub fn plugin(&self, name: &str) -> Option<PluginRecord> {
        self.registry.get(name)
    }

    pub fn plugin_state(&self, name: &str) -> Option<PluginState> {
        self.registry.state(name)
    }

    pub fn plugin_data(&self, name: &str, key: &str) -> Option<String> {
        self.store.get(name, key)
    }

    pub fn plugins(&self) -> Vec<PluginRecord> {
        self.registry.snapshot()
    }

    /// Snapshot of the `plugins` subtree: every plugin with its state and data.
    pub fn object_model(&self) -> ObjectModel {
        let plugins = self
            .registry
            .snapshot()
            .into_iter()
            .map(|record| {
                let data = self.store.partition(&record.name).unwrap_or_default();
                (record.name.clone(), PluginModel::from_record(record, data))
            })
            .collect();
        ObjectModel { plugins }
    }

    /// Identity a plugin acts under, carrying the permissions its manifest declares.
    pub fn plugin_identity(&self, name: &str) -> Option<CallerIdentity> {
        self.registry.get(name).map(|record| {
            CallerIdentity::plugin(record.name).with_permissions(record.manifest.permissions)
        })
    }
}

fn timeout_error(limit: Duration) -> SupervisorError {
    SupervisorError::Timeout {
        timeout_ms: limit.as_millis() as u64,
    }
}
