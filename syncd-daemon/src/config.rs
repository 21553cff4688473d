//! Daemon configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Wake-up timer mechanism, selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WakeBackendKind {
    /// Durable sqlite table plus a single countdown timer.
    #[default]
    AlarmStore,
    /// Coalescing heartbeat windows.
    Heartbeat,
    /// Power-aware frequency buckets with rush/off-peak switch support.
    BackgroundActivity,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Where the persistent-timer backend keeps its alarm table.
    pub alarm_db_path: PathBuf,
    pub wake_backend: WakeBackendKind,
    /// Quiet period after a storage-change notification before the
    /// affected profiles are synced.
    pub change_debounce: Duration,
    /// Bound on how long a runner stop waits for its worker.
    pub stop_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            alarm_db_path: PathBuf::from("alarms.sqlite"),
            wake_backend: WakeBackendKind::AlarmStore,
            change_debounce: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(5),
        }
    }
}
