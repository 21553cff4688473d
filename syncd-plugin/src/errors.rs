//! Error types for plugin runners.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("plugin runner already initialized")]
    AlreadyInitialized,

    #[error("plugin runner not initialized")]
    NotInitialized,

    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("plugin worker already running")]
    WorkerRunning,

    #[error("plugin worker did not stop within {0:?}")]
    StopTimeout(std::time::Duration),

    #[error("plugin cleanup failed: {0}")]
    CleanupFailed(String),
}

pub type Result<T> = std::result::Result<T, PluginError>;
