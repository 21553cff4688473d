//! Daemon-level error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] syncd_scheduler::SchedulerError),

    #[error("plugin error: {0}")]
    Plugin(#[from] syncd_plugin::PluginError),

    #[error("orchestrator is gone")]
    OrchestratorGone,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
