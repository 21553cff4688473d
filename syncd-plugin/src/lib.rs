//! Plugin contract and plugin runners.
//!
//! Vendor sync logic is isolated behind the [`ClientPlugin`] and
//! [`ServerPlugin`] traits and executed on a dedicated worker task owned
//! by a plugin runner. Runners never expose the plugin object directly;
//! everything observable flows out as [`PluginEvent`] values posted to
//! the owning event loop.

pub mod client;
pub mod errors;
pub mod events;
pub mod plugin;
pub mod registry;
pub mod runner;
pub mod server;

pub use client::ClientPluginRunner;
pub use errors::{PluginError, Result};
pub use events::{ErrorStatus, EventSink, PluginEvent};
pub use plugin::{AbortStatus, ClientPlugin, ServerPlugin, SyncFailure, WorkerControl};
pub use registry::PluginRegistry;
pub use runner::PluginRunner;
pub use server::ServerPluginRunner;
