#![allow(dead_code)]

use async_trait::async_trait;
use plugin_control::{
    CallerIdentity, Command, Dispatcher, HostConfig, InMemoryBundleResolver, PluginManifest,
    PluginRecord, ProcessSupervisor, SbcPermission, SupervisorError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Supervisor whose transitions only complete once the test releases them.
pub struct GatedSupervisor {
    gate: Semaphore,
    fail_start: AtomicBool,
    starts: AtomicUsize,
}

impl GatedSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
        })
    }

    pub fn release(&self, transitions: usize) {
        self.gate.add_permits(transitions);
    }

    pub fn fail_next_starts(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    async fn pass(&self) -> Result<(), SupervisorError> {
        self.gate
            .acquire()
            .await
            .map(|permit| permit.forget())
            .map_err(|e| SupervisorError::LaunchFailed(e.to_string()))
    }
}

#[async_trait]
impl ProcessSupervisor for GatedSupervisor {
    async fn start(&self, _plugin: &PluginRecord) -> Result<(), SupervisorError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.pass().await?;
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(SupervisorError::LaunchFailed("exit code 1".to_string()));
        }
        Ok(())
    }

    async fn stop(&self, _plugin: &PluginRecord) -> Result<(), SupervisorError> {
        self.pass().await
    }
}

pub fn bundle_path(name: &str) -> String {
    format!("/bundles/{name}.zip")
}

/// Resolver knowing `/bundles/<name>.zip` for each name.
pub fn resolver(names: &[&str]) -> Arc<InMemoryBundleResolver> {
    let resolver = InMemoryBundleResolver::new();
    for name in names {
        resolver.insert(
            bundle_path(name),
            PluginManifest::new(*name)
                .with_version("1.0.0")
                .with_permissions([SbcPermission::ObjectModelRead]),
        );
    }
    Arc::new(resolver)
}

pub fn dispatcher_with(
    names: &[&str],
    supervisor: Arc<dyn ProcessSupervisor>,
) -> Dispatcher {
    Dispatcher::new(HostConfig::default(), resolver(names), supervisor)
}

pub fn admin() -> CallerIdentity {
    CallerIdentity::administrator()
}

pub async fn install(dispatcher: &Dispatcher, name: &str) {
    dispatcher
        .submit(&admin(), Command::install_plugin(bundle_path(name)))
        .await
        .expect("install failed");
}

/// Installs and starts `name`, waiting until it is running.
pub async fn install_running(dispatcher: &Dispatcher, name: &str) {
    install(dispatcher, name).await;
    dispatcher
        .submit(&admin(), Command::start_plugin(name))
        .await
        .expect("start failed");
    dispatcher.wait_for_transitions().await;
}
