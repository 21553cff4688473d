//! Top-level sync coordinator.
//!
//! A single actor task owns every piece of session state: the active
//! table, the queue, the retry and wake schedulers. Everything else
//! talks to it through messages; plugin workers and timer backends post
//! events onto dedicated channels consumed by the same loop, so state is
//! never mutated concurrently. The storage booker is the one exception:
//! it is shared with externally invoked reservation calls and carries
//! its own lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use syncd_plugin::{
    AbortStatus, ClientPluginRunner, PluginEvent, PluginRegistry, PluginRunner,
    ServerPluginRunner, SyncFailure,
};
use syncd_profile::{ProfileStore, SyncMinorCode, SyncProfile, SyncResults};
use syncd_scheduler::{RetryScheduler, WakeBackend, WakeEvent, WakeScheduler};

use crate::booker::StorageBooker;
use crate::config::DaemonConfig;
use crate::connectivity::{Connectivity, NetworkSession, PowerMonitor};
use crate::errors::{DaemonError, Result};
use crate::queue::SessionQueue;
use crate::session::{SessionState, SharedBooker, SyncSession};

/// Status notification mirroring the session state machine, broadcast to
/// front-end subscribers.
#[derive(Debug, Clone)]
pub enum SyncStatusEvent {
    Queued { profile: String },
    Started { profile: String },
    Progress { profile: String, detail: i32 },
    Finished {
        profile: String,
        state: SessionState,
        results: SyncResults,
    },
}

enum OrchestratorMessage {
    StartSync {
        profile: String,
        scheduled: bool,
        reply: oneshot::Sender<bool>,
    },
    AbortSync {
        profile: String,
    },
    NetworkOpened {
        profile: String,
        ok: bool,
    },
    ConnectivityChanged {
        online: bool,
    },
    StorageReleased,
    StorageChanged {
        storage: String,
    },
    SyncOnChangeDue {
        storage: String,
    },
    ProfileChanged {
        profile: String,
    },
    RemoveProfile {
        profile: String,
        reply: oneshot::Sender<bool>,
    },
    RunningSyncs {
        reply: oneshot::Sender<Vec<String>>,
    },
    BackupStarted,
    BackupFinished,
    RestoreStarted,
    RestoreFinished,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front door to the orchestrator task.
///
/// Storage reservation calls go straight to the shared booker instead of
/// through the message loop so external callers get a synchronous answer.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<OrchestratorMessage>,
    booker: SharedBooker,
    status_tx: broadcast::Sender<SyncStatusEvent>,
}

impl OrchestratorHandle {
    /// Request a sync for `profile`. Returns true when the sync started,
    /// was queued, or is already in progress.
    pub async fn start_sync(&self, profile: &str, scheduled: bool) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(OrchestratorMessage::StartSync {
            profile: profile.to_string(),
            scheduled,
            reply,
        })
        .await?;
        rx.await.map_err(|_| DaemonError::OrchestratorGone)
    }

    pub async fn abort_sync(&self, profile: &str) -> Result<()> {
        self.send(OrchestratorMessage::AbortSync {
            profile: profile.to_string(),
        })
        .await
    }

    pub async fn running_syncs(&self) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(OrchestratorMessage::RunningSyncs { reply }).await?;
        rx.await.map_err(|_| DaemonError::OrchestratorGone)
    }

    /// Remove a profile, running the plugin's cleanup hook first. Fails
    /// (returns false) while a session for the profile is active.
    pub async fn remove_profile(&self, profile: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(OrchestratorMessage::RemoveProfile {
            profile: profile.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| DaemonError::OrchestratorGone)
    }

    /// Re-arm scheduling after a profile was added or edited.
    pub async fn profile_changed(&self, profile: &str) -> Result<()> {
        self.send(OrchestratorMessage::ProfileChanged {
            profile: profile.to_string(),
        })
        .await
    }

    /// Notify that local data in `storage` changed; affected profiles are
    /// synced after a debounce period.
    pub async fn storage_changed(&self, storage: &str) -> Result<()> {
        self.send(OrchestratorMessage::StorageChanged {
            storage: storage.to_string(),
        })
        .await
    }

    pub async fn connectivity_changed(&self, online: bool) -> Result<()> {
        self.send(OrchestratorMessage::ConnectivityChanged { online })
            .await
    }

    pub async fn backup_started(&self) -> Result<()> {
        self.send(OrchestratorMessage::BackupStarted).await
    }

    pub async fn backup_finished(&self) -> Result<()> {
        self.send(OrchestratorMessage::BackupFinished).await
    }

    pub async fn restore_started(&self) -> Result<()> {
        self.send(OrchestratorMessage::RestoreStarted).await
    }

    pub async fn restore_finished(&self) -> Result<()> {
        self.send(OrchestratorMessage::RestoreFinished).await
    }

    /// Reserve storages on behalf of an external caller.
    pub fn request_storages(&self, names: &[String], owner: &str) -> bool {
        self.booker.reserve(names, owner)
    }

    /// Release externally reserved storages and let the queue drain.
    pub fn release_storages(&self, names: &[String]) {
        self.booker.release(names);
        if let Err(e) = self.tx.try_send(OrchestratorMessage::StorageReleased) {
            warn!(error = %e, "storage release signal not delivered, queue drain delayed");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Stop servers, cancel sessions and end the orchestrator task.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(OrchestratorMessage::Shutdown { reply }).await?;
        rx.await.map_err(|_| DaemonError::OrchestratorGone)
    }

    async fn send(&self, msg: OrchestratorMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| DaemonError::OrchestratorGone)
    }
}

/// External collaborators handed to the orchestrator at construction.
pub struct Collaborators {
    pub connectivity: Arc<dyn Connectivity>,
    pub network: Arc<dyn NetworkSession>,
    pub power: Arc<dyn PowerMonitor>,
}

/// Build the orchestrator and spawn its task. `make_backend` receives
/// the channel the wake backend must deliver due events on.
pub fn spawn_orchestrator<F>(
    store: Arc<dyn ProfileStore>,
    registry: Arc<PluginRegistry>,
    collaborators: Collaborators,
    config: DaemonConfig,
    make_backend: F,
) -> Result<OrchestratorHandle>
where
    F: FnOnce(mpsc::Sender<WakeEvent>) -> syncd_scheduler::Result<Box<dyn WakeBackend>>,
{
    let (tx, rx) = mpsc::channel(64);
    let (wake_tx, wake_rx) = mpsc::channel(64);
    let (plugin_tx, plugin_rx) = mpsc::channel(64);
    let (status_tx, _) = broadcast::channel(64);
    let booker = Arc::new(StorageBooker::new());

    let backend = make_backend(wake_tx)?;

    let orchestrator = Orchestrator {
        store,
        registry,
        config,
        booker: booker.clone(),
        queue: SessionQueue::new(),
        active: HashMap::new(),
        servers: HashMap::new(),
        server_sessions: HashMap::new(),
        retry: RetryScheduler::new(),
        wake: WakeScheduler::new(backend),
        connectivity: collaborators.connectivity,
        network: collaborators.network,
        power: collaborators.power,
        waiting_network: Vec::new(),
        pending_network: HashMap::new(),
        change_pending: HashSet::new(),
        backup_active: false,
        shutting_down: false,
        rx,
        self_tx: tx.clone(),
        wake_rx,
        plugin_rx,
        plugin_tx,
        status_tx: status_tx.clone(),
    };
    tokio::spawn(orchestrator.run());

    Ok(OrchestratorHandle {
        tx,
        booker,
        status_tx,
    })
}

struct Orchestrator {
    store: Arc<dyn ProfileStore>,
    registry: Arc<PluginRegistry>,
    config: DaemonConfig,
    booker: SharedBooker,
    queue: SessionQueue,
    /// Sessions currently started or progressing, keyed by profile name.
    active: HashMap<String, SyncSession>,
    /// Long-running server runners, keyed by their profile name.
    servers: HashMap<String, ServerPluginRunner>,
    /// Server profile name -> profile name of the bound inbound session.
    server_sessions: HashMap<String, String>,
    retry: RetryScheduler,
    wake: WakeScheduler,
    connectivity: Arc<dyn Connectivity>,
    network: Arc<dyn NetworkSession>,
    power: Arc<dyn PowerMonitor>,
    /// Online-destination sessions parked until connectivity returns.
    waiting_network: Vec<SyncSession>,
    /// Sessions whose network path is being opened, keyed by profile.
    pending_network: HashMap<String, SyncSession>,
    /// Storages with a running sync-on-change debounce timer.
    change_pending: HashSet<String>,
    backup_active: bool,
    shutting_down: bool,
    rx: mpsc::Receiver<OrchestratorMessage>,
    self_tx: mpsc::Sender<OrchestratorMessage>,
    wake_rx: mpsc::Receiver<WakeEvent>,
    plugin_rx: mpsc::Receiver<PluginEvent>,
    plugin_tx: mpsc::Sender<PluginEvent>,
    status_tx: broadcast::Sender<SyncStatusEvent>,
}

impl Orchestrator {
    async fn run(mut self) {
        self.startup().await;
        loop {
            tokio::select! {
                Some(msg) = self.rx.recv() => {
                    let stop = matches!(msg, OrchestratorMessage::Shutdown { .. });
                    self.handle_message(msg).await;
                    if stop {
                        break;
                    }
                }
                Some(event) = self.plugin_rx.recv() => self.handle_plugin(event).await,
                Some(event) = self.wake_rx.recv() => self.handle_wake(event).await,
                else => break,
            }
        }
        info!("orchestrator stopped");
    }

    /// Start server plugins and arm wake-ups for scheduled profiles.
    async fn startup(&mut self) {
        let profiles = self.store.all_sync_profiles();
        info!(profiles = profiles.len(), "orchestrator starting");
        for profile in profiles {
            if !profile.enabled {
                continue;
            }
            if let Some(server) = profile.server_profile.clone() {
                self.start_server(server, profile);
            } else {
                self.arm_next_schedule(&profile).await;
            }
        }
    }

    async fn handle_message(&mut self, msg: OrchestratorMessage) {
        match msg {
            OrchestratorMessage::StartSync {
                profile,
                scheduled,
                reply,
            } => {
                let accepted = self.handle_start(&profile, scheduled).await;
                let _ = reply.send(accepted);
            }
            OrchestratorMessage::AbortSync { profile } => self.handle_abort(&profile).await,
            OrchestratorMessage::NetworkOpened { profile, ok } => {
                self.handle_network_opened(&profile, ok).await
            }
            OrchestratorMessage::ConnectivityChanged { online } => {
                self.handle_connectivity(online).await
            }
            OrchestratorMessage::StorageReleased => self.drain_queue().await,
            OrchestratorMessage::StorageChanged { storage } => self.debounce_change(storage),
            OrchestratorMessage::SyncOnChangeDue { storage } => {
                self.handle_change_due(&storage).await
            }
            OrchestratorMessage::ProfileChanged { profile } => {
                self.handle_profile_changed(&profile).await
            }
            OrchestratorMessage::RemoveProfile { profile, reply } => {
                let removed = self.handle_remove_profile(&profile).await;
                let _ = reply.send(removed);
            }
            OrchestratorMessage::RunningSyncs { reply } => {
                let mut names: Vec<String> = self.active.keys().cloned().collect();
                names.sort();
                let _ = reply.send(names);
            }
            OrchestratorMessage::BackupStarted | OrchestratorMessage::RestoreStarted => {
                self.enter_backup().await
            }
            OrchestratorMessage::BackupFinished | OrchestratorMessage::RestoreFinished => {
                self.leave_backup().await
            }
            OrchestratorMessage::Shutdown { reply } => {
                self.shutting_down = true;
                self.do_shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    // ---- admission -------------------------------------------------

    async fn handle_start(&mut self, name: &str, scheduled: bool) -> bool {
        if self.backup_active {
            warn!(profile = name, "sync refused, backup or restore in progress");
            return false;
        }
        if self.is_pending(name) {
            debug!(profile = name, "sync already in progress");
            return true;
        }
        let profile = match self.store.sync_profile(name) {
            Some(profile) => profile,
            None => {
                self.record_admission_failure(name, scheduled, "profile not found");
                return false;
            }
        };
        if !profile.enabled {
            self.record_admission_failure(name, scheduled, "profile is disabled");
            return false;
        }
        if !profile.is_valid() || profile.client_profile.is_none() {
            self.record_admission_failure(name, scheduled, "profile has no usable client plugin");
            return false;
        }
        if scheduled && self.power.in_power_save() {
            let mut session = SyncSession::new(profile, scheduled);
            session.fail(SyncMinorCode::LowBattery, "device in power save mode");
            self.complete_session(session).await;
            return false;
        }
        let session = SyncSession::new(profile, scheduled);
        self.admit(session).await
    }

    fn is_pending(&self, name: &str) -> bool {
        self.active.contains_key(name)
            || self.queue.contains(name)
            || self.pending_network.contains_key(name)
            || self.waiting_network.iter().any(|s| s.profile_name() == name)
    }

    /// Admission: sub-profile exclusivity, connectivity, reservation.
    /// Returns false only when session construction itself failed.
    async fn admit(&mut self, session: SyncSession) -> bool {
        let name = session.profile_name().to_string();
        if self.sub_profile_busy(session.profile.sub_profile_name()) {
            debug!(profile = %name, "sub-profile busy, queueing");
            self.enqueue(session);
            return true;
        }
        if session.profile.is_online_destination() {
            if !self.connectivity.is_online() {
                info!(profile = %name, "offline, parking session until connectivity returns");
                self.emit(SyncStatusEvent::Queued {
                    profile: name.clone(),
                });
                self.waiting_network.push(session);
                return true;
            }
            // Open the network path first; the session stays un-started
            // until the outcome comes back as a message.
            let tx = self.self_tx.clone();
            let network = self.network.clone();
            let background = session.scheduled;
            self.pending_network.insert(name.clone(), session);
            tokio::spawn(async move {
                let ok = network.open(background).await;
                let _ = tx
                    .send(OrchestratorMessage::NetworkOpened { profile: name, ok })
                    .await;
            });
            return true;
        }
        self.reserve_and_start(session).await
    }

    async fn reserve_and_start(&mut self, mut session: SyncSession) -> bool {
        if !session.reserve_storages(&self.booker) {
            debug!(profile = %session.profile_name(), "storages busy, queueing");
            self.enqueue(session);
            return true;
        }
        match self.start_runner(&mut session) {
            Ok(()) => {
                session.state = SessionState::Started;
                self.emit(SyncStatusEvent::Started {
                    profile: session.profile_name().to_string(),
                });
                info!(profile = %session.profile_name(), scheduled = session.scheduled, "sync started");
                self.active
                    .insert(session.profile_name().to_string(), session);
                true
            }
            Err(e) => {
                warn!(profile = %session.profile_name(), error = %e, "failed to start plugin runner");
                session.fail(SyncMinorCode::InternalError, e.to_string());
                self.complete_session(session).await;
                false
            }
        }
    }

    fn start_runner(&self, session: &mut SyncSession) -> syncd_plugin::Result<()> {
        let plugin = session
            .profile
            .client_profile
            .clone()
            .expect("admission checked the client sub-profile");
        let mut runner: Box<dyn PluginRunner> = Box::new(
            ClientPluginRunner::new(
                plugin,
                session.profile.clone(),
                self.registry.clone(),
                self.plugin_tx.clone(),
            )
            .with_stop_timeout(self.config.stop_timeout),
        );
        runner.init()?;
        runner.start()?;
        session.runner = Some(runner);
        Ok(())
    }

    fn enqueue(&mut self, session: SyncSession) {
        let name = session.profile_name().to_string();
        if self.queue.enqueue(session) {
            self.emit(SyncStatusEvent::Queued { profile: name });
        }
    }

    fn sub_profile_busy(&self, sub: Option<&str>) -> bool {
        match sub {
            Some(sub) => self
                .active
                .values()
                .any(|s| s.profile.sub_profile_name() == Some(sub)),
            None => false,
        }
    }

    fn record_admission_failure(&mut self, name: &str, scheduled: bool, message: &str) {
        warn!(profile = name, message, "sync request refused");
        let mut results = SyncResults::failure(SyncMinorCode::InternalError, message);
        results.scheduled = scheduled;
        self.store.save_results(name, &results);
        self.emit(SyncStatusEvent::Finished {
            profile: name.to_string(),
            state: SessionState::Error,
            results,
        });
    }

    // ---- abort and network outcomes --------------------------------

    async fn handle_abort(&mut self, name: &str) {
        if self.active.contains_key(name) {
            info!(profile = name, "aborting active session");
            let hosted = {
                let session = self.active.get_mut(name).unwrap();
                session.aborted = true;
                match &session.runner {
                    Some(runner) => {
                        runner.abort(AbortStatus::Aborted);
                        false
                    }
                    None => true,
                }
            };
            if hosted {
                // Inbound session; the hosting server drives it.
                if let Some(server) = self.server_for_session(name) {
                    if let Some(runner) = self.servers.get(&server) {
                        runner.abort(AbortStatus::Aborted);
                    }
                }
            }
            return;
        }
        if let Some(mut session) = self.queue.dequeue_matching(name) {
            session.finish(SessionState::Cancelled, "aborted before start");
            self.complete_session(session).await;
            return;
        }
        if let Some(pos) = self
            .waiting_network
            .iter()
            .position(|s| s.profile_name() == name)
        {
            let mut session = self.waiting_network.remove(pos);
            session.finish(SessionState::Cancelled, "aborted before start");
            self.complete_session(session).await;
            return;
        }
        if let Some(mut session) = self.pending_network.remove(name) {
            session.finish(SessionState::Cancelled, "aborted before start");
            self.complete_session(session).await;
            return;
        }
        debug!(profile = name, "abort requested for unknown session");
    }

    fn server_for_session(&self, session_name: &str) -> Option<String> {
        self.server_sessions
            .iter()
            .find(|(_, bound)| bound.as_str() == session_name)
            .map(|(server, _)| server.clone())
    }

    async fn handle_network_opened(&mut self, name: &str, ok: bool) {
        let Some(mut session) = self.pending_network.remove(name) else {
            return;
        };
        if !ok {
            warn!(profile = name, "network open failed");
            session.fail(SyncMinorCode::ConnectionError, "failed to open network path");
            self.complete_session(session).await;
            return;
        }
        // Re-check exclusivity; things may have moved while opening.
        if self.sub_profile_busy(session.profile.sub_profile_name()) {
            self.enqueue(session);
            return;
        }
        self.reserve_and_start(session).await;
    }

    async fn handle_connectivity(&mut self, online: bool) {
        if !online {
            return;
        }
        let parked = std::mem::take(&mut self.waiting_network);
        if !parked.is_empty() {
            info!(sessions = parked.len(), "connectivity restored, releasing parked sessions");
        }
        for session in parked {
            self.admit(session).await;
        }
    }

    // ---- plugin events ---------------------------------------------

    async fn handle_plugin(&mut self, event: PluginEvent) {
        // Events from a hosting server are routed to its bound session.
        let routed = self.server_sessions.get(event.profile()).cloned();
        match event {
            PluginEvent::NewSession {
                server_profile,
                destination,
            } => self.handle_new_session(server_profile, destination),
            PluginEvent::Progress { profile, detail } => {
                let name = routed.unwrap_or(profile);
                if let Some(session) = self.active.get_mut(&name) {
                    if session.state == SessionState::Started {
                        session.state = SessionState::Progress;
                    }
                    self.emit(SyncStatusEvent::Progress {
                        profile: name,
                        detail,
                    });
                }
            }
            PluginEvent::StorageAcquired { profile, data_kind } => {
                let name = routed.unwrap_or(profile);
                if let Some(session) = self.active.get_mut(&name) {
                    session.storage_map.insert(data_kind, true);
                }
            }
            PluginEvent::Success { profile, message } => match routed {
                Some(bound) => self.finish_inbound(&profile, &bound, Ok(message)).await,
                None => {
                    if let Some(session) = self.active.get_mut(&profile) {
                        session.finish(SessionState::Done, message);
                    }
                }
            },
            PluginEvent::Error {
                profile,
                message,
                status,
            } => {
                let failure = SyncFailure { status, message };
                match routed {
                    Some(bound) => self.finish_inbound(&profile, &bound, Err(failure)).await,
                    None => {
                        if let Some(session) = self.active.get_mut(&profile) {
                            session.plugin_error(&failure);
                        }
                    }
                }
            }
            PluginEvent::Done { profile } => self.handle_worker_done(&profile).await,
        }
    }

    /// Terminal event for a session hosted by a server plugin. Unlike
    /// client sessions there is no `Done` to wait for; the server worker
    /// keeps running.
    async fn finish_inbound(
        &mut self,
        server: &str,
        bound: &str,
        outcome: std::result::Result<String, SyncFailure>,
    ) {
        self.server_sessions.remove(server);
        let Some(mut session) = self.active.remove(bound) else {
            return;
        };
        match outcome {
            Ok(message) => session.finish(SessionState::Done, message),
            Err(failure) => session.plugin_error(&failure),
        }
        self.complete_session(session).await;
        self.drain_queue().await;
    }

    async fn handle_worker_done(&mut self, profile: &str) {
        if self.servers.contains_key(profile) {
            // The server worker exited; outside shutdown that is a fault.
            if !self.shutting_down {
                warn!(server = profile, "server plugin exited unexpectedly");
            }
            self.servers.remove(profile);
            if let Some(bound) = self.server_sessions.remove(profile) {
                if let Some(mut session) = self.active.remove(&bound) {
                    session.finish(SessionState::Cancelled, "hosting server stopped");
                    self.complete_session(session).await;
                }
            }
            return;
        }
        let Some(session) = self.active.get(profile) else {
            return;
        };
        if session.state.is_terminal() {
            let session = self.active.remove(profile).unwrap();
            self.complete_session(session).await;
        } else {
            // Worker exited without reporting; count it as a failure.
            let mut session = self.active.remove(profile).unwrap();
            session.fail(SyncMinorCode::InternalError, "plugin worker exited without a result");
            self.complete_session(session).await;
        }
        self.drain_queue().await;
    }

    fn handle_new_session(&mut self, server: String, destination: String) {
        if self.backup_active {
            warn!(server = %server, "inbound session refused, backup or restore in progress");
            return;
        }
        if self.server_sessions.contains_key(&server) {
            warn!(server = %server, "server already hosts a session, ignoring announcement");
            return;
        }
        let (profile, created) = match self
            .store
            .profiles_by_destination(&destination)
            .into_iter()
            .next()
        {
            Some(profile) => (profile, false),
            None => (self.store.create_temp_profile(&destination), true),
        };
        let mut session = SyncSession::new(profile, false);
        session.profile_created = created;
        if !session.reserve_storages(&self.booker) {
            warn!(
                server = %server,
                profile = %session.profile_name(),
                "storages busy, rejecting inbound session"
            );
            return;
        }
        session.state = SessionState::Started;
        let name = session.profile_name().to_string();
        info!(server = %server, profile = %name, destination = %destination, "inbound session accepted");
        self.server_sessions.insert(server, name.clone());
        self.emit(SyncStatusEvent::Started {
            profile: name.clone(),
        });
        self.active.insert(name, session);
    }

    // ---- completion ------------------------------------------------

    /// Central completion handler: releases resources, persists results,
    /// arms retries or the next scheduled wake-up.
    async fn complete_session(&mut self, mut session: SyncSession) {
        let name = session.profile_name().to_string();
        session.release_storages(&self.booker);
        if !session.storage_map.is_empty() {
            self.store.enable_storages(&name, &session.storage_map);
        }
        let results = session.results();
        if session.profile_created && results.is_success() {
            // Temporary profiles earn persistence only by succeeding.
            self.store.save_profile(&session.profile);
        }
        self.store.save_results(&name, &results);
        info!(profile = %name, state = ?session.state, "sync finished");
        self.emit(SyncStatusEvent::Finished {
            profile: name.clone(),
            state: session.state,
            results: results.clone(),
        });
        if session.scheduled && !self.shutting_down {
            self.arm_after_finish(&session, &results).await;
        }
    }

    async fn arm_after_finish(&mut self, session: &SyncSession, results: &SyncResults) {
        let name = session.profile_name();
        if results.is_success() {
            self.retry.clear(name);
            let profile = session.profile.clone();
            self.arm_next_schedule(&profile).await;
            return;
        }
        if session.is_retryable_failure() {
            self.retry.note_failure(&session.profile);
            if let Some(delay) = self.retry.next_delay(name) {
                let when = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                info!(profile = %name, secs = delay.as_secs(), "arming retry");
                if let Err(e) = self.wake.arm(name, when).await {
                    warn!(profile = %name, error = %e, "failed to arm retry wake-up");
                }
                return;
            }
            info!(profile = %name, "retries exhausted");
        }
        let profile = session.profile.clone();
        self.arm_next_schedule(&profile).await;
    }

    async fn arm_next_schedule(&mut self, profile: &SyncProfile) {
        if !profile.is_scheduled() || !profile.enabled {
            if let Err(e) = self.wake.disarm(&profile.name).await {
                warn!(profile = %profile.name, error = %e, "failed to disarm wake-up");
            }
            return;
        }
        let last = self.store.last_sync_time(&profile.name);
        match profile.next_sync_time(last) {
            Some(when) => {
                if let Err(e) = self.wake.arm(&profile.name, when).await {
                    warn!(profile = %profile.name, error = %e, "failed to arm wake-up");
                }
                if let Some(switch) = profile.schedule.next_switch_time(Utc::now()) {
                    if let Err(e) = self.wake.arm_switch(&profile.name, switch).await {
                        warn!(profile = %profile.name, error = %e, "failed to arm switch timer");
                    }
                }
            }
            None => {
                if let Err(e) = self.wake.disarm(&profile.name).await {
                    warn!(profile = %profile.name, error = %e, "failed to disarm wake-up");
                }
            }
        }
    }

    /// Pop and start queued sessions until the head is blocked or the
    /// queue is empty.
    async fn drain_queue(&mut self) {
        loop {
            let startable = match self.queue.head() {
                None => break,
                Some(head) => {
                    !self.sub_profile_busy(head.profile.sub_profile_name())
                        && self
                            .booker
                            .available(&head.profile.storage_backends, head.profile_name())
                }
            };
            if !startable {
                break;
            }
            if let Some(session) = self.queue.pop_head() {
                self.admit(session).await;
            }
        }
    }

    // ---- wake events -----------------------------------------------

    async fn handle_wake(&mut self, event: WakeEvent) {
        match event {
            WakeEvent::Due { profile } => {
                debug!(profile = %profile, "scheduled wake-up due");
                self.wake.note_fired(&profile);
                self.handle_start(&profile, true).await;
            }
            WakeEvent::SwitchDue { profile } => {
                debug!(profile = %profile, "rush window boundary crossed");
                if let Some(profile) = self.store.sync_profile(&profile) {
                    self.arm_next_schedule(&profile).await;
                }
            }
        }
    }

    // ---- profile and storage change handling -----------------------

    fn debounce_change(&mut self, storage: String) {
        if !self.change_pending.insert(storage.clone()) {
            return;
        }
        debug!(storage = %storage, "storage changed, debouncing");
        let tx = self.self_tx.clone();
        let debounce = self.config.change_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = tx
                .send(OrchestratorMessage::SyncOnChangeDue { storage })
                .await;
        });
    }

    async fn handle_change_due(&mut self, storage: &str) {
        self.change_pending.remove(storage);
        let affected: Vec<String> = self
            .store
            .all_sync_profiles()
            .into_iter()
            .filter(|p| {
                p.enabled
                    && p.client_profile.is_some()
                    && p.storage_backends.iter().any(|s| s == storage)
            })
            .map(|p| p.name)
            .collect();
        for name in affected {
            info!(profile = %name, storage, "starting sync on local change");
            self.handle_start(&name, false).await;
        }
    }

    async fn handle_profile_changed(&mut self, name: &str) {
        match self.store.sync_profile(name) {
            Some(profile) => self.arm_next_schedule(&profile).await,
            None => {
                if let Err(e) = self.wake.disarm(name).await {
                    warn!(profile = name, error = %e, "failed to disarm wake-up");
                }
                self.retry.clear(name);
            }
        }
    }

    async fn handle_remove_profile(&mut self, name: &str) -> bool {
        if self.active.contains_key(name) {
            warn!(profile = name, "cannot remove profile with an active session");
            return false;
        }
        if let Some(mut session) = self.queue.dequeue_matching(name) {
            session.finish(SessionState::Cancelled, "profile removed");
            self.complete_session(session).await;
        }
        if let Err(e) = self.wake.disarm(name).await {
            warn!(profile = name, error = %e, "failed to disarm wake-up");
        }
        self.retry.clear(name);
        if let Some(profile) = self.store.sync_profile(name) {
            self.run_plugin_cleanup(&profile);
        }
        let removed = self.store.remove_profile(name);
        info!(profile = name, removed, "profile removal processed");
        removed
    }

    /// Give the plugin a chance to drop its own state (sync anchors) for
    /// a profile being deleted. Best effort.
    fn run_plugin_cleanup(&self, profile: &SyncProfile) {
        let Some(plugin) = profile.client_profile.clone() else {
            return;
        };
        let mut runner = ClientPluginRunner::new(
            plugin,
            profile.clone(),
            self.registry.clone(),
            self.plugin_tx.clone(),
        );
        if let Err(e) = runner.init().and_then(|_| runner.clean_up()) {
            warn!(profile = %profile.name, error = %e, "plugin cleanup failed");
        }
    }

    // ---- backup/restore gating -------------------------------------

    /// All running sessions are aborted, queued ones cancelled, servers
    /// suspended. Aborted sessions are not retried: they never truly
    /// failed and are expected to be re-requested afterwards.
    async fn enter_backup(&mut self) {
        if self.backup_active {
            return;
        }
        info!("backup or restore started, preempting syncs");
        self.backup_active = true;
        for session in self.active.values_mut() {
            session.aborted = true;
            if let Some(runner) = &session.runner {
                runner.abort(AbortStatus::Aborted);
            }
        }
        // Inbound sessions have no runner of their own; the hosting
        // server carries the abort request.
        for (server, bound) in &self.server_sessions {
            if self.active.contains_key(bound) {
                if let Some(runner) = self.servers.get(server) {
                    runner.abort(AbortStatus::Aborted);
                }
            }
        }
        for (_, runner) in self.servers.iter() {
            runner.suspend();
        }
        let cancelled = self.queue.drain_all();
        for mut session in cancelled {
            session.finish(SessionState::Cancelled, "preempted by backup or restore");
            self.complete_session(session).await;
        }
        let parked = std::mem::take(&mut self.waiting_network);
        for mut session in parked {
            session.finish(SessionState::Cancelled, "preempted by backup or restore");
            self.complete_session(session).await;
        }
    }

    async fn leave_backup(&mut self) {
        if !self.backup_active {
            return;
        }
        info!("backup or restore finished, resuming");
        self.backup_active = false;
        for (_, runner) in self.servers.iter() {
            runner.resume();
        }
        for profile in self.store.all_sync_profiles() {
            if profile.enabled && profile.server_profile.is_none() {
                self.arm_next_schedule(&profile).await;
            }
        }
    }

    // ---- server lifecycle ------------------------------------------

    fn start_server(&mut self, plugin: String, profile: SyncProfile) {
        if !self.registry.has_server(&plugin) {
            warn!(server = %plugin, profile = %profile.name, "server plugin not registered");
            return;
        }
        let name = profile.name.clone();
        let mut runner = ServerPluginRunner::new(
            plugin,
            profile,
            self.registry.clone(),
            self.plugin_tx.clone(),
        )
        .with_stop_timeout(self.config.stop_timeout);
        if let Err(e) = runner.init().and_then(|_| runner.start()) {
            warn!(server = %name, error = %e, "failed to start server plugin");
            return;
        }
        info!(server = %name, "server plugin started");
        self.servers.insert(name, runner);
    }

    async fn do_shutdown(&mut self) {
        info!("orchestrator shutting down");
        let cancelled = self.queue.drain_all();
        for mut session in cancelled {
            session.finish(SessionState::Cancelled, "daemon shutting down");
            self.complete_session(session).await;
        }
        let names: Vec<String> = self.active.keys().cloned().collect();
        for name in names {
            let Some(mut session) = self.active.remove(&name) else {
                continue;
            };
            session.aborted = true;
            if let Some(runner) = session.runner.as_mut() {
                runner.abort(AbortStatus::Aborted);
                if let Err(e) = runner.stop().await {
                    warn!(profile = %name, error = %e, "runner did not stop cleanly");
                }
            }
            if !session.state.is_terminal() {
                session.finish(SessionState::Cancelled, "daemon shutting down");
            }
            self.complete_session(session).await;
        }
        self.server_sessions.clear();
        let mut servers: Vec<(String, ServerPluginRunner)> = self.servers.drain().collect();
        for (name, server) in servers.iter_mut() {
            if let Err(e) = server.stop().await {
                warn!(server = %name, error = %e, "server did not stop cleanly");
            }
        }
    }

    fn emit(&self, event: SyncStatusEvent) {
        let _ = self.status_tx.send(event);
    }
}
