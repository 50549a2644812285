//! # Lifecycle events
//!
//! Every accepted command and every asynchronous completion is published as a
//! [`LifecycleEvent`] on the [`EventBus`]:
//!
//! ```text
//! ┌──────────┐  submit   ┌────────────┐  publish  ┌──────────┐  recv  ┌────────────┐
//! │  Caller  │──────────▶│ Dispatcher │──────────▶│ EventBus │───────▶│ Subscriber │
//! └──────────┘           └─────┬──────┘           └────▲─────┘        └────────────┘
//!                              │ spawn                 │
//!                              ▼                       │ Started / StartFailed
//!                        ┌────────────┐                │ Stopped / StopFailed
//!                        │ Supervisor │────────────────┘
//!                        └────────────┘
//! ```

pub mod event_bus;

pub use event_bus::*;
