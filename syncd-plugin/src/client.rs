//! Client plugin runner: drives one outbound sync on a blocking worker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use syncd_profile::{SyncMinorCode, SyncProfile, SyncResults};

use crate::errors::{PluginError, Result};
use crate::events::{ErrorStatus, EventSink, PluginEvent};
use crate::plugin::{AbortStatus, ClientPlugin, SyncFailure, WorkerControl};
use crate::registry::PluginRegistry;
use crate::runner::PluginRunner;

/// Default bound on how long `stop()` waits for the worker to exit.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

type PluginSlot = Arc<Mutex<Option<Box<dyn ClientPlugin>>>>;

pub struct ClientPluginRunner {
    plugin_name: String,
    profile: SyncProfile,
    registry: Arc<PluginRegistry>,
    events: mpsc::Sender<PluginEvent>,
    ctl: Arc<WorkerControl>,
    /// Plugin instance; empty while the worker owns it.
    plugin: PluginSlot,
    supervisor: Option<JoinHandle<()>>,
    results: Arc<Mutex<SyncResults>>,
    stop_timeout: Duration,
    initialized: bool,
    started: bool,
}

impl ClientPluginRunner {
    pub fn new(
        plugin_name: impl Into<String>,
        profile: SyncProfile,
        registry: Arc<PluginRegistry>,
        events: mpsc::Sender<PluginEvent>,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            profile,
            registry,
            events,
            ctl: Arc::new(WorkerControl::new()),
            plugin: Arc::new(Mutex::new(None)),
            supervisor: None,
            results: Arc::new(Mutex::new(SyncResults::default())),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            initialized: false,
            started: false,
        }
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }
}

#[async_trait]
impl PluginRunner for ClientPluginRunner {
    fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Err(PluginError::AlreadyInitialized);
        }
        let plugin = self
            .registry
            .create_client(&self.plugin_name, &self.profile)
            .ok_or_else(|| PluginError::UnknownPlugin(self.plugin_name.clone()))?;
        *self.plugin.lock().unwrap() = Some(plugin);
        self.initialized = true;
        debug!(plugin = %self.plugin_name, profile = %self.profile.name, "client plugin runner initialized");
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(PluginError::NotInitialized);
        }
        if self.started {
            return Err(PluginError::WorkerRunning);
        }
        let plugin = self
            .plugin
            .lock()
            .unwrap()
            .take()
            .ok_or(PluginError::WorkerRunning)?;
        self.started = true;

        let profile_name = self.profile.name.clone();
        let ctl = self.ctl.clone();
        let events = self.events.clone();
        let results = self.results.clone();
        let slot = self.plugin.clone();

        self.supervisor = Some(tokio::spawn(async move {
            let sink = EventSink::new(profile_name.clone(), events.clone());
            let worker = tokio::task::spawn_blocking(move || {
                let mut plugin = plugin;
                let outcome = plugin.sync(&ctl, &sink);
                (plugin, outcome)
            });

            let terminal = match worker.await {
                Ok((plugin, outcome)) => {
                    *slot.lock().unwrap() = Some(plugin);
                    match outcome {
                        Ok(res) => {
                            let message = res.message.clone();
                            *results.lock().unwrap() = res;
                            PluginEvent::Success {
                                profile: profile_name.clone(),
                                message,
                            }
                        }
                        Err(failure) => {
                            *results.lock().unwrap() = results_for_failure(&failure);
                            PluginEvent::Error {
                                profile: profile_name.clone(),
                                message: failure.message,
                                status: failure.status,
                            }
                        }
                    }
                }
                Err(join_err) => {
                    warn!(profile = %profile_name, error = %join_err, "plugin worker panicked");
                    *results.lock().unwrap() = SyncResults::failure(
                        SyncMinorCode::InternalError,
                        format!("plugin worker panicked: {join_err}"),
                    );
                    PluginEvent::Error {
                        profile: profile_name.clone(),
                        message: "plugin worker panicked".to_string(),
                        status: ErrorStatus::Code(0),
                    }
                }
            };

            let _ = events.send(terminal).await;
            let _ = events
                .send(PluginEvent::Done {
                    profile: profile_name,
                })
                .await;
        }));

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.ctl.request_stop();
        if let Some(handle) = self.supervisor.take() {
            if timeout(self.stop_timeout, handle).await.is_err() {
                warn!(plugin = %self.plugin_name, "worker did not stop in time, detaching");
                return Err(PluginError::StopTimeout(self.stop_timeout));
            }
        }
        Ok(())
    }

    fn abort(&self, status: AbortStatus) {
        debug!(plugin = %self.plugin_name, ?status, "forwarding abort to plugin");
        self.ctl.request_abort(status);
    }

    fn results(&self) -> SyncResults {
        self.results.lock().unwrap().clone()
    }

    fn is_running(&self) -> bool {
        self.supervisor
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn clean_up(&mut self) -> Result<()> {
        let mut slot = self.plugin.lock().unwrap();
        let plugin = slot.as_mut().ok_or(PluginError::NotInitialized)?;
        plugin
            .clean_up()
            .map_err(|f| PluginError::CleanupFailed(f.message))
    }
}

fn results_for_failure(failure: &SyncFailure) -> SyncResults {
    match failure.status {
        ErrorStatus::Aborted => {
            let mut res = SyncResults::cancelled();
            res.message = failure.message.clone();
            res
        }
        ErrorStatus::NotPossible => {
            SyncResults::failure(SyncMinorCode::NotPossible, failure.message.clone())
        }
        ErrorStatus::Code(code) => {
            SyncResults::failure(SyncMinorCode::PluginError(code), failure.message.clone())
        }
    }
}
