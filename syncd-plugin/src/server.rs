//! Server plugin runner: hosts a listening plugin accepting inbound
//! sessions. Supports suspend/resume distinct from stop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use syncd_profile::{SyncMinorCode, SyncProfile, SyncResults};

use crate::client::DEFAULT_STOP_TIMEOUT;
use crate::errors::{PluginError, Result};
use crate::events::{EventSink, PluginEvent};
use crate::plugin::{AbortStatus, ServerPlugin, WorkerControl};
use crate::registry::PluginRegistry;
use crate::runner::PluginRunner;

type PluginSlot = Arc<Mutex<Option<Box<dyn ServerPlugin>>>>;

pub struct ServerPluginRunner {
    plugin_name: String,
    profile: SyncProfile,
    registry: Arc<PluginRegistry>,
    events: mpsc::Sender<PluginEvent>,
    ctl: Arc<WorkerControl>,
    plugin: PluginSlot,
    supervisor: Option<JoinHandle<()>>,
    results: Arc<Mutex<SyncResults>>,
    stop_timeout: Duration,
    initialized: bool,
    started: bool,
}

impl ServerPluginRunner {
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

    /// Pause the server without tearing the worker down. Used during
    /// backup/restore; inbound sessions resume afterwards.
    pub fn suspend(&self) {
        debug!(server = %self.plugin_name, "suspending server plugin");
        self.ctl.suspend();
    }

    pub fn resume(&self) {
        debug!(server = %self.plugin_name, "resuming server plugin");
        self.ctl.resume();
    }

    pub fn is_suspended(&self) -> bool {
        self.ctl.is_suspended()
    }
}

#[async_trait]
impl PluginRunner for ServerPluginRunner {
    fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Err(PluginError::AlreadyInitialized);
        }
        let plugin = self
            .registry
            .create_server(&self.plugin_name, &self.profile)
            .ok_or_else(|| PluginError::UnknownPlugin(self.plugin_name.clone()))?;
        *self.plugin.lock().unwrap() = Some(plugin);
        self.initialized = true;
        debug!(server = %self.plugin_name, "server plugin runner initialized");
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

        let server_name = self.profile.name.clone();
        let ctl = self.ctl.clone();
        let events = self.events.clone();
        let results = self.results.clone();
        let slot = self.plugin.clone();

        self.supervisor = Some(tokio::spawn(async move {
            let sink = EventSink::new(server_name.clone(), events.clone());
            let worker = tokio::task::spawn_blocking(move || {
                let mut plugin = plugin;
                let outcome = plugin.run(&ctl, &sink);
                (plugin, outcome)
            });

            match worker.await {
                Ok((plugin, outcome)) => {
                    *slot.lock().unwrap() = Some(plugin);
                    if let Err(failure) = outcome {
                        warn!(server = %server_name, message = %failure.message, "server plugin failed");
                        *results.lock().unwrap() = SyncResults::failure(
                            SyncMinorCode::InternalError,
                            failure.message.clone(),
                        );
                        let _ = events
                            .send(PluginEvent::Error {
                                profile: server_name.clone(),
                                message: failure.message,
                                status: failure.status,
                            })
                            .await;
                    }
                }
                Err(join_err) => {
                    warn!(server = %server_name, error = %join_err, "server plugin worker panicked");
                }
            }

            let _ = events
                .send(PluginEvent::Done {
                    profile: server_name,
                })
                .await;
        }));

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.ctl.request_stop();
        if let Some(handle) = self.supervisor.take() {
            if timeout(self.stop_timeout, handle).await.is_err() {
                warn!(server = %self.plugin_name, "server worker did not stop in time, detaching");
                return Err(PluginError::StopTimeout(self.stop_timeout));
            }
        }
        Ok(())
    }

    fn abort(&self, status: AbortStatus) {
        debug!(server = %self.plugin_name, ?status, "forwarding abort to server plugin");
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
