//! Daemon assembly: picks the wake backend and spawns the orchestrator.

use std::sync::Arc;

use tracing::info;

use syncd_plugin::PluginRegistry;
use syncd_profile::ProfileStore;
use syncd_scheduler::{
    AlarmStoreBackend, BackgroundActivityBackend, HeartbeatBackend, WakeBackend,
};

use crate::config::{DaemonConfig, WakeBackendKind};
use crate::errors::Result;
use crate::orchestrator::{spawn_orchestrator, Collaborators, OrchestratorHandle};

/// Wire up the daemon and return the orchestrator handle. The returned
/// handle is the only way to talk to the running engine.
pub fn start_daemon(
    store: Arc<dyn ProfileStore>,
    registry: Arc<PluginRegistry>,
    collaborators: Collaborators,
    config: DaemonConfig,
) -> Result<OrchestratorHandle> {
    let kind = config.wake_backend;
    let alarm_db_path = config.alarm_db_path.clone();
    info!(backend = ?kind, "starting sync daemon");

    spawn_orchestrator(store, registry, collaborators, config, move |wake_tx| {
        let backend: Box<dyn WakeBackend> = match kind {
            WakeBackendKind::AlarmStore => {
                let mut backend = AlarmStoreBackend::open(&alarm_db_path, wake_tx)?;
                backend.start();
                Box::new(backend)
            }
            WakeBackendKind::Heartbeat => Box::new(HeartbeatBackend::new(wake_tx)),
            WakeBackendKind::BackgroundActivity => {
                Box::new(BackgroundActivityBackend::new(wake_tx))
            }
        };
        Ok(backend)
    })
}
