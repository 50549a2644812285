//! Process supervisor seam.
//!
//! Launching and terminating plugin processes belongs to an external
//! supervisor. The dispatcher calls it after recording `Starting`/`Stopping`
//! and finalizes the transition with whatever it reports.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::registry::PluginRecord;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("Process failed to launch: {0}")]
    LaunchFailed(String),
    #[error("Process failed to terminate: {0}")]
    TerminateFailed(String),
    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Resolves once the plugin process is up (or failed to come up).
    async fn start(&self, plugin: &PluginRecord) -> Result<(), SupervisorError>;

    /// Resolves once the plugin process has exited (or refused to).
    async fn stop(&self, plugin: &PluginRecord) -> Result<(), SupervisorError>;
}

/// Supervisor for plugins without a process of their own: every transition
/// completes immediately.
#[derive(Debug, Clone, Default)]
pub struct ImmediateSupervisor;

#[async_trait]
impl ProcessSupervisor for ImmediateSupervisor {
    async fn start(&self, plugin: &PluginRecord) -> Result<(), SupervisorError> {
        info!(plugin = %plugin.name, entry_point = ?plugin.manifest.entry_point, "start requested");
        Ok(())
    }

    async fn stop(&self, plugin: &PluginRecord) -> Result<(), SupervisorError> {
        info!(plugin = %plugin.name, "stop requested");
        Ok(())
    }
}
