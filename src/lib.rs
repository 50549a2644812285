//! # plugin-control
//!
//! Command dispatch and lifecycle core of a plugin host. Clients submit
//! [`Command`]s (install, start, stop, uninstall, set plugin data) to the
//! [`Dispatcher`], which checks them against the [`PermissionEvaluator`],
//! applies them to the [`PluginRegistry`] and [`PluginDataStore`], and
//! publishes every change on the [`EventBus`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use plugin_control::{
//!     CallerIdentity, Command, Dispatcher, HostConfig, ImmediateSupervisor, ManifestFileResolver,
//! };
//!
//! # async fn example() -> plugin_control::PluginResult<()> {
//! let dispatcher = Dispatcher::new(
//!     HostConfig::default(),
//!     Arc::new(ManifestFileResolver),
//!     Arc::new(ImmediateSupervisor),
//! );
//! let admin = CallerIdentity::administrator();
//! dispatcher.submit(&admin, Command::install_plugin("/opt/plugins/weather")).await?;
//! dispatcher.submit(&admin, Command::start_plugin("weather")).await?;
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod model;
pub mod permission;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod supervisor;

// Re-exports
pub use bundle::{BundleResolver, InMemoryBundleResolver, ManifestFileResolver, PluginManifest};
pub use command::{Command, CommandKind};
pub use config::HostConfig;
pub use dispatcher::{CommandOutcome, Dispatcher};
pub use error::*;
pub use event::{EventBus, EventReceiver, LifecycleEvent, LifecycleEventKind};
pub use model::{ObjectModel, PluginModel};
pub use permission::{CallerIdentity, Decision, PermissionEvaluator, Principal, SbcPermission};
pub use registry::{PluginRecord, PluginRegistry, PluginState};
pub use store::PluginDataStore;
pub use supervisor::{ImmediateSupervisor, ProcessSupervisor, SupervisorError};
