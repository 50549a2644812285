//! # Event Bus
//!
//! Broadcast hub for lifecycle events. Start and stop complete asynchronously,
//! so their outcome (including `StartFailed`/`StopFailed`) is only observable
//! here.
//!
//! The bus keeps one internal receiver so publishing never fails for lack of
//! subscribers. A slow subscriber that falls behind gets one
//! [`EventError::Lagged`] and then continues with the oldest event still
//! buffered.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::PluginError;
use crate::registry::PluginState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LifecycleEventKind {
    Installed { upgrade: bool },
    Starting,
    Started,
    StartFailed { reason: String },
    Stopping,
    Stopped,
    StopFailed { reason: String },
    Uninstalled,
    DataChanged { key: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub plugin: String,
    #[serde(flatten)]
    pub kind: LifecycleEventKind,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(plugin: impl Into<String>, kind: LifecycleEventKind) -> Self {
        Self {
            plugin: plugin.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// The registry state this event leaves the plugin in, when it implies one.
    pub fn resulting_state(&self) -> Option<PluginState> {
        match self.kind {
            LifecycleEventKind::Installed { .. } => Some(PluginState::Installed),
            LifecycleEventKind::Starting => Some(PluginState::Starting),
            LifecycleEventKind::Started => Some(PluginState::Running),
            LifecycleEventKind::Stopping => Some(PluginState::Stopping),
            LifecycleEventKind::Stopped => Some(PluginState::Stopped),
            LifecycleEventKind::StopFailed { .. } => Some(PluginState::Running),
            LifecycleEventKind::Uninstalled => Some(PluginState::Uninstalled),
            LifecycleEventKind::StartFailed { .. } | LifecycleEventKind::DataChanged { .. } => {
                None
            }
        }
    }

    /// The asynchronous failure carried by this event, if any.
    pub fn error(&self) -> Option<PluginError> {
        match &self.kind {
            LifecycleEventKind::StartFailed { reason } => Some(PluginError::StartFailed {
                plugin: self.plugin.clone(),
                reason: reason.clone(),
            }),
            LifecycleEventKind::StopFailed { reason } => Some(PluginError::StopFailed {
                plugin: self.plugin.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Failed to send event: {message}")]
    SendFailed { message: String },
    #[error("Receiver lagged behind by {count} events")]
    Lagged { count: u64 },
    #[error("Event bus closed")]
    Closed,
}

pub type EventResult<T> = Result<T, EventError>;

pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
    _internal_receiver: broadcast::Receiver<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, internal_receiver) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            _internal_receiver: internal_receiver,
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe())
    }

    pub fn publish(&self, event: LifecycleEvent) -> EventResult<()> {
        trace!(plugin = %event.plugin, kind = ?event.kind, "publish");
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<LifecycleEvent>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<LifecycleEvent>) -> Self {
        Self { receiver }
    }

    /// Receives the next event. On lag, reports how many events were
    /// overwritten; the next call yields the oldest event still buffered.
    pub async fn recv(&mut self) -> EventResult<LifecycleEvent> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(count)) => Err(EventError::Lagged { count }),
            Err(broadcast::error::RecvError::Closed) => Err(EventError::Closed),
        }
    }

    /// Waits for the next event about `plugin` that satisfies `predicate`.
    pub async fn wait_for<F>(&mut self, plugin: &str, predicate: F) -> EventResult<LifecycleEvent>
    where
        F: Fn(&LifecycleEventKind) -> bool,
    {
        loop {
            match self.recv().await {
                Ok(event) if event.plugin == plugin && predicate(&event.kind) => return Ok(event),
                Ok(_) | Err(EventError::Lagged { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
