//! Session orchestration engine for the sync daemon.
//!
//! One actor task coordinates everything: admission control over shared
//! storage backends, a FIFO queue for sessions denied admission, plugin
//! runners driving vendor sync logic on worker threads, retry campaigns
//! after failures and wake-up scheduling for the next attempt.

pub mod booker;
pub mod config;
pub mod connectivity;
pub mod daemon;
pub mod errors;
pub mod orchestrator;
pub mod queue;
pub mod session;

pub use booker::StorageBooker;
pub use config::{DaemonConfig, WakeBackendKind};
pub use daemon::start_daemon;
pub use errors::{DaemonError, Result};
pub use orchestrator::{spawn_orchestrator, Collaborators, OrchestratorHandle, SyncStatusEvent};
pub use queue::SessionQueue;
pub use session::{SessionState, SyncSession};
