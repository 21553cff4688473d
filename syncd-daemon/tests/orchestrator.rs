//! End-to-end orchestrator behavior: admission control, queueing,
//! retries, preemption and inbound server sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use syncd_daemon::connectivity::{
    AlwaysOpenNetwork, FixedNetwork, NetworkSession, StaticConnectivity, StaticPowerMonitor,
};
use syncd_daemon::{
    spawn_orchestrator, Collaborators, DaemonConfig, OrchestratorHandle, SessionState,
    SyncStatusEvent,
};
use syncd_plugin::{
    ClientPlugin, EventSink, PluginRegistry, ServerPlugin, SyncFailure, WorkerControl,
};
use syncd_profile::{
    DestinationType, InMemoryProfileStore, ProfileStore, SyncMajorCode, SyncMinorCode, SyncProfile,
    SyncResults, SyncType,
};
use syncd_scheduler::{Result as SchedResult, WakeBackend};

#[derive(Clone)]
enum Outcome {
    Success,
    Fail(i32),
}

/// Test plugin: optionally blocks on a shared gate, then reports the
/// scripted outcome. Observes abort requests while blocked.
struct ScriptedPlugin {
    gate: Option<Arc<AtomicBool>>,
    outcome: Outcome,
    cleanup_flag: Option<Arc<AtomicBool>>,
}

impl ScriptedPlugin {
    fn success() -> Self {
        Self {
            gate: None,
            outcome: Outcome::Success,
            cleanup_flag: None,
        }
    }

    fn failing(code: i32) -> Self {
        Self {
            gate: None,
            outcome: Outcome::Fail(code),
            cleanup_flag: None,
        }
    }

    fn gated(gate: Arc<AtomicBool>) -> Self {
        Self {
            gate: Some(gate),
            outcome: Outcome::Success,
            cleanup_flag: None,
        }
    }
}

impl ClientPlugin for ScriptedPlugin {
    fn name(&self) -> &str {
        "scripted"
    }

    fn sync(
        &mut self,
        ctl: &WorkerControl,
        _events: &EventSink,
    ) -> Result<SyncResults, SyncFailure> {
        loop {
            if let Some(status) = ctl.abort_requested() {
                return Err(status.into());
            }
            if ctl.stop_requested() {
                return Err(SyncFailure::aborted());
            }
            match &self.gate {
                Some(gate) if !gate.load(Ordering::SeqCst) => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                _ => break,
            }
        }
        match self.outcome {
            Outcome::Success => Ok(SyncResults::success("all items synced")),
            Outcome::Fail(code) => Err(SyncFailure::code(code, "remote rejected the sync")),
        }
    }

    fn clean_up(&mut self) -> Result<(), SyncFailure> {
        if let Some(flag) = &self.cleanup_flag {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Records arm calls instead of timing anything.
struct RecordingBackend {
    arms: Arc<Mutex<Vec<(String, DateTime<Utc>)>>>,
}

#[async_trait]
impl WakeBackend for RecordingBackend {
    async fn arm(&mut self, profile: &str, when: DateTime<Utc>) -> SchedResult<()> {
        self.arms.lock().unwrap().push((profile.to_string(), when));
        Ok(())
    }

    async fn disarm(&mut self, _profile: &str) -> SchedResult<()> {
        Ok(())
    }

    async fn disarm_all(&mut self) -> SchedResult<()> {
        Ok(())
    }
}

struct Harness {
    store: Arc<InMemoryProfileStore>,
    handle: OrchestratorHandle,
    arms: Arc<Mutex<Vec<(String, DateTime<Utc>)>>>,
    connectivity: Arc<StaticConnectivity>,
    power: Arc<StaticPowerMonitor>,
}

impl Harness {
    fn arms_for(&self, profile: &str) -> Vec<DateTime<Utc>> {
        self.arms
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == profile)
            .map(|(_, when)| *when)
            .collect()
    }
}

fn harness(registry: PluginRegistry, profiles: Vec<SyncProfile>) -> Harness {
    harness_with(registry, profiles, Arc::new(AlwaysOpenNetwork), true)
}

fn harness_with(
    registry: PluginRegistry,
    profiles: Vec<SyncProfile>,
    network: Arc<dyn NetworkSession>,
    online: bool,
) -> Harness {
    let store = Arc::new(InMemoryProfileStore::new());
    for profile in profiles {
        store.insert(profile);
    }
    let connectivity = StaticConnectivity::new(online);
    let power = StaticPowerMonitor::new(false);
    let arms = Arc::new(Mutex::new(Vec::new()));
    let backend_arms = arms.clone();

    let handle = spawn_orchestrator(
        store.clone(),
        Arc::new(registry),
        Collaborators {
            connectivity: connectivity.clone(),
            network,
            power: power.clone(),
        },
        DaemonConfig {
            change_debounce: Duration::from_millis(50),
            ..DaemonConfig::default()
        },
        move |_wake_tx| {
            Ok(Box::new(RecordingBackend {
                arms: backend_arms,
            }))
        },
    )
    .unwrap();

    Harness {
        store,
        handle,
        arms,
        connectivity,
        power,
    }
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<SyncStatusEvent>, mut pred: F) -> SyncStatusEvent
where
    F: FnMut(&SyncStatusEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("status channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for status event")
}

fn is_finished(profile: &str) -> impl FnMut(&SyncStatusEvent) -> bool + '_ {
    move |ev| matches!(ev, SyncStatusEvent::Finished { profile: p, .. } if p == profile)
}

fn is_started(profile: &str) -> impl FnMut(&SyncStatusEvent) -> bool + '_ {
    move |ev| matches!(ev, SyncStatusEvent::Started { profile: p } if p == profile)
}

fn is_queued(profile: &str) -> impl FnMut(&SyncStatusEvent) -> bool + '_ {
    move |ev| matches!(ev, SyncStatusEvent::Queued { profile: p } if p == profile)
}

fn storages(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ---- admission errors ----------------------------------------------

#[tokio::test]
async fn disabled_profile_is_refused_with_one_error_record() {
    let mut registry = PluginRegistry::new();
    registry.register_client("caldav", |_| Box::new(ScriptedPlugin::success()));
    let mut profile = SyncProfile::new("cal-sync", "caldav");
    profile.enabled = false;
    profile.storage_backends = storages(&["calendar"]);
    let h = harness(registry, vec![profile]);

    assert!(!h.handle.start_sync("cal-sync", false).await.unwrap());

    let history = h.store.results_history("cal-sync");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].minor_code, SyncMinorCode::InternalError);
    // No reservation was made.
    assert!(h.handle.request_storages(&storages(&["calendar"]), "probe"));
}

#[tokio::test]
async fn unknown_profile_is_refused() {
    let h = harness(PluginRegistry::new(), vec![]);
    assert!(!h.handle.start_sync("nope", false).await.unwrap());
    assert_eq!(h.store.results_history("nope").len(), 1);
}

#[tokio::test]
async fn scheduled_sync_is_refused_in_power_save_but_manual_runs() {
    let mut registry = PluginRegistry::new();
    registry.register_client("caldav", |_| Box::new(ScriptedPlugin::success()));
    let mut profile = SyncProfile::new("cal-sync", "caldav");
    profile.sync_type = SyncType::Scheduled;
    let h = harness(registry, vec![profile]);
    let mut rx = h.handle.subscribe();

    h.power.set_power_save(true);
    assert!(!h.handle.start_sync("cal-sync", true).await.unwrap());
    let event = wait_for(&mut rx, is_finished("cal-sync")).await;
    match event {
        SyncStatusEvent::Finished { state, .. } => assert_eq!(state, SessionState::Error),
        _ => unreachable!(),
    }
    let history = h.store.results_history("cal-sync");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].minor_code, SyncMinorCode::LowBattery);
    // Low-battery refusals are not retried.
    assert!(h.arms_for("cal-sync").is_empty());

    // Manual requests ignore the power gate.
    assert!(h.handle.start_sync("cal-sync", false).await.unwrap());
    let event = wait_for(&mut rx, is_finished("cal-sync")).await;
    match event {
        SyncStatusEvent::Finished { state, .. } => assert_eq!(state, SessionState::Done),
        _ => unreachable!(),
    }
}

// ---- exclusivity and queueing --------------------------------------

#[tokio::test]
async fn second_request_for_active_profile_is_already_in_progress() {
    let gate = Arc::new(AtomicBool::new(false));
    let plugin_gate = gate.clone();
    let mut registry = PluginRegistry::new();
    registry.register_client("caldav", move |_| {
        Box::new(ScriptedPlugin::gated(plugin_gate.clone()))
    });
    let h = harness(registry, vec![SyncProfile::new("cal-sync", "caldav")]);
    let mut rx = h.handle.subscribe();

    assert!(h.handle.start_sync("cal-sync", false).await.unwrap());
    assert!(h.handle.start_sync("cal-sync", false).await.unwrap());
    assert_eq!(h.handle.running_syncs().await.unwrap(), vec!["cal-sync"]);

    gate.store(true, Ordering::SeqCst);
    wait_for(&mut rx, is_finished("cal-sync")).await;
    // One session, one result.
    assert_eq!(h.store.results_history("cal-sync").len(), 1);
}

#[tokio::test]
async fn shared_sub_profile_queues_second_session() {
    let gate = Arc::new(AtomicBool::new(false));
    let plugin_gate = gate.clone();
    let mut registry = PluginRegistry::new();
    registry.register_client("caldav", move |_| {
        Box::new(ScriptedPlugin::gated(plugin_gate.clone()))
    });
    let h = harness(
        registry,
        vec![
            SyncProfile::new("work-cal", "caldav"),
            SyncProfile::new("home-cal", "caldav"),
        ],
    );
    let mut rx = h.handle.subscribe();

    assert!(h.handle.start_sync("work-cal", false).await.unwrap());
    assert!(h.handle.start_sync("home-cal", false).await.unwrap());
    wait_for(&mut rx, is_queued("home-cal")).await;
    assert_eq!(h.handle.running_syncs().await.unwrap(), vec!["work-cal"]);

    gate.store(true, Ordering::SeqCst);
    wait_for(&mut rx, is_finished("work-cal")).await;
    wait_for(&mut rx, is_started("home-cal")).await;
    wait_for(&mut rx, is_finished("home-cal")).await;
}

#[tokio::test]
async fn shared_storage_queues_and_drains_on_completion() {
    let gate = Arc::new(AtomicBool::new(false));
    let plugin_gate = gate.clone();
    let mut registry = PluginRegistry::new();
    registry.register_client("carddav", move |_| {
        Box::new(ScriptedPlugin::gated(plugin_gate.clone()))
    });
    registry.register_client("syncml", |_| Box::new(ScriptedPlugin::success()));

    let mut first = SyncProfile::new("addressbook", "carddav");
    first.storage_backends = storages(&["contacts"]);
    let mut second = SyncProfile::new("phone-sync", "syncml");
    second.storage_backends = storages(&["contacts"]);
    let h = harness(registry, vec![first, second]);
    let mut rx = h.handle.subscribe();

    assert!(h.handle.start_sync("addressbook", false).await.unwrap());
    assert!(h.handle.start_sync("phone-sync", false).await.unwrap());
    wait_for(&mut rx, is_queued("phone-sync")).await;

    // The storage is held by the first session; external callers and the
    // queued session are both locked out.
    assert!(!h.handle.request_storages(&storages(&["contacts"]), "probe"));

    gate.store(true, Ordering::SeqCst);
    wait_for(&mut rx, is_finished("addressbook")).await;
    wait_for(&mut rx, is_started("phone-sync")).await;
    let event = wait_for(&mut rx, is_finished("phone-sync")).await;
    match event {
        SyncStatusEvent::Finished { results, .. } => assert!(results.is_success()),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn queue_drains_in_fifo_order() {
    let gate = Arc::new(AtomicBool::new(false));
    let plugin_gate = gate.clone();
    let mut registry = PluginRegistry::new();
    registry.register_client("plug-a", move |_| {
        Box::new(ScriptedPlugin::gated(plugin_gate.clone()))
    });
    registry.register_client("plug-b", |_| Box::new(ScriptedPlugin::success()));
    registry.register_client("plug-c", |_| Box::new(ScriptedPlugin::success()));

    let mut p1 = SyncProfile::new("one", "plug-a");
    p1.storage_backends = storages(&["notes"]);
    let mut p2 = SyncProfile::new("two", "plug-b");
    p2.storage_backends = storages(&["notes"]);
    let mut p3 = SyncProfile::new("three", "plug-c");
    p3.storage_backends = storages(&["notes"]);
    let h = harness(registry, vec![p1, p2, p3]);
    let mut rx = h.handle.subscribe();

    assert!(h.handle.start_sync("one", false).await.unwrap());
    assert!(h.handle.start_sync("two", false).await.unwrap());
    assert!(h.handle.start_sync("three", false).await.unwrap());

    gate.store(true, Ordering::SeqCst);
    wait_for(&mut rx, is_finished("one")).await;
    // FIFO: "two" starts before "three".
    wait_for(&mut rx, is_started("two")).await;
    wait_for(&mut rx, is_finished("two")).await;
    wait_for(&mut rx, is_started("three")).await;
    wait_for(&mut rx, is_finished("three")).await;
}

#[tokio::test]
async fn aborting_a_queued_session_records_cancelled() {
    let gate = Arc::new(AtomicBool::new(false));
    let plugin_gate = gate.clone();
    let mut registry = PluginRegistry::new();
    registry.register_client("plug-a", move |_| {
        Box::new(ScriptedPlugin::gated(plugin_gate.clone()))
    });
    registry.register_client("plug-b", |_| Box::new(ScriptedPlugin::success()));

    let mut p1 = SyncProfile::new("one", "plug-a");
    p1.storage_backends = storages(&["notes"]);
    let mut p2 = SyncProfile::new("two", "plug-b");
    p2.storage_backends = storages(&["notes"]);
    let h = harness(registry, vec![p1, p2]);
    let mut rx = h.handle.subscribe();

    assert!(h.handle.start_sync("one", false).await.unwrap());
    assert!(h.handle.start_sync("two", false).await.unwrap());
    wait_for(&mut rx, is_queued("two")).await;

    h.handle.abort_sync("two").await.unwrap();
    let event = wait_for(&mut rx, is_finished("two")).await;
    match event {
        SyncStatusEvent::Finished { state, results, .. } => {
            assert_eq!(state, SessionState::Cancelled);
            assert_eq!(results.major_code, SyncMajorCode::Cancelled);
        }
        _ => unreachable!(),
    }
    gate.store(true, Ordering::SeqCst);
    wait_for(&mut rx, is_finished("one")).await;
}

// ---- retries -------------------------------------------------------

#[tokio::test]
async fn failed_scheduled_sync_consumes_retry_delays_then_stops() {
    let mut registry = PluginRegistry::new();
    registry.register_client("imap", |_| Box::new(ScriptedPlugin::failing(7)));
    let mut profile = SyncProfile::new("mail", "imap");
    profile.sync_type = SyncType::Scheduled;
    profile.retry_delays_mins = vec![5, 15];
    let h = harness(registry, vec![profile]);
    let mut rx = h.handle.subscribe();

    let before = Utc::now();
    assert!(h.handle.start_sync("mail", true).await.unwrap());
    wait_for(&mut rx, is_finished("mail")).await;
    let arms = h.arms_for("mail");
    assert_eq!(arms.len(), 1);
    let delta = arms[0] - before;
    assert!(delta >= chrono::Duration::minutes(5));
    assert!(delta <= chrono::Duration::minutes(5) + chrono::Duration::seconds(30));

    // Second failure arms the 15 minute delay.
    let before = Utc::now();
    assert!(h.handle.start_sync("mail", true).await.unwrap());
    wait_for(&mut rx, is_finished("mail")).await;
    let arms = h.arms_for("mail");
    assert_eq!(arms.len(), 2);
    let delta = arms[1] - before;
    assert!(delta >= chrono::Duration::minutes(15));
    assert!(delta <= chrono::Duration::minutes(15) + chrono::Duration::seconds(30));

    // Third failure: campaign exhausted, nothing further armed.
    assert!(h.handle.start_sync("mail", true).await.unwrap());
    wait_for(&mut rx, is_finished("mail")).await;
    assert_eq!(h.arms_for("mail").len(), 2);
}

#[tokio::test]
async fn manual_failures_do_not_start_retry_campaigns() {
    let mut registry = PluginRegistry::new();
    registry.register_client("imap", |_| Box::new(ScriptedPlugin::failing(7)));
    let mut profile = SyncProfile::new("mail", "imap");
    profile.retry_delays_mins = vec![5];
    let h = harness(registry, vec![profile]);
    let mut rx = h.handle.subscribe();

    assert!(h.handle.start_sync("mail", false).await.unwrap());
    wait_for(&mut rx, is_finished("mail")).await;
    assert!(h.arms_for("mail").is_empty());
}

// ---- backup/restore preemption -------------------------------------

#[tokio::test]
async fn backup_aborts_active_session_without_scheduling_retry() {
    let gate = Arc::new(AtomicBool::new(false));
    let plugin_gate = gate.clone();
    let mut registry = PluginRegistry::new();
    registry.register_client("caldav", move |_| {
        Box::new(ScriptedPlugin::gated(plugin_gate.clone()))
    });
    let mut profile = SyncProfile::new("cal-sync", "caldav");
    profile.sync_type = SyncType::Scheduled;
    profile.retry_delays_mins = vec![5];
    let h = harness(registry, vec![profile]);
    let mut rx = h.handle.subscribe();

    assert!(h.handle.start_sync("cal-sync", true).await.unwrap());
    wait_for(&mut rx, is_started("cal-sync")).await;

    h.handle.backup_started().await.unwrap();
    let event = wait_for(&mut rx, is_finished("cal-sync")).await;
    match event {
        SyncStatusEvent::Finished { state, results, .. } => {
            assert_eq!(state, SessionState::Aborted);
            assert_eq!(results.major_code, SyncMajorCode::Cancelled);
        }
        _ => unreachable!(),
    }
    // Preemption is not a failure: no retry armed.
    assert!(h.arms_for("cal-sync").is_empty());

    // New syncs are refused until the backup finishes.
    assert!(!h.handle.start_sync("cal-sync", false).await.unwrap());

    gate.store(true, Ordering::SeqCst);
    h.handle.backup_finished().await.unwrap();
    assert!(h.handle.start_sync("cal-sync", false).await.unwrap());
    wait_for(&mut rx, is_finished("cal-sync")).await;
}

#[tokio::test]
async fn backup_cancels_queued_sessions() {
    let gate = Arc::new(AtomicBool::new(false));
    let plugin_gate = gate.clone();
    let mut registry = PluginRegistry::new();
    registry.register_client("plug-a", move |_| {
        Box::new(ScriptedPlugin::gated(plugin_gate.clone()))
    });
    registry.register_client("plug-b", |_| Box::new(ScriptedPlugin::success()));

    let mut p1 = SyncProfile::new("one", "plug-a");
    p1.storage_backends = storages(&["notes"]);
    let mut p2 = SyncProfile::new("two", "plug-b");
    p2.storage_backends = storages(&["notes"]);
    let h = harness(registry, vec![p1, p2]);
    let mut rx = h.handle.subscribe();

    assert!(h.handle.start_sync("one", false).await.unwrap());
    assert!(h.handle.start_sync("two", false).await.unwrap());
    wait_for(&mut rx, is_queued("two")).await;

    h.handle.backup_started().await.unwrap();
    let event = wait_for(&mut rx, is_finished("two")).await;
    match event {
        SyncStatusEvent::Finished { state, .. } => assert_eq!(state, SessionState::Cancelled),
        _ => unreachable!(),
    }
    gate.store(true, Ordering::SeqCst);
    wait_for(&mut rx, is_finished("one")).await;
}

// ---- connectivity --------------------------------------------------

#[tokio::test]
async fn offline_online_destination_parks_until_connectivity_returns() {
    let mut registry = PluginRegistry::new();
    registry.register_client("caldav", |_| Box::new(ScriptedPlugin::success()));
    let mut profile = SyncProfile::new("cloud-cal", "caldav");
    profile.destination = DestinationType::Online;
    let h = harness_with(registry, vec![profile], Arc::new(AlwaysOpenNetwork), false);
    let mut rx = h.handle.subscribe();

    assert!(h.handle.start_sync("cloud-cal", false).await.unwrap());
    wait_for(&mut rx, is_queued("cloud-cal")).await;
    assert!(h.handle.running_syncs().await.unwrap().is_empty());

    h.connectivity.set_online(true);
    h.handle.connectivity_changed(true).await.unwrap();
    wait_for(&mut rx, is_started("cloud-cal")).await;
    let event = wait_for(&mut rx, is_finished("cloud-cal")).await;
    match event {
        SyncStatusEvent::Finished { results, .. } => assert!(results.is_success()),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn network_open_failure_surfaces_connection_error() {
    let mut registry = PluginRegistry::new();
    registry.register_client("caldav", |_| Box::new(ScriptedPlugin::success()));
    let mut profile = SyncProfile::new("cloud-cal", "caldav");
    profile.destination = DestinationType::Online;
    let h = harness_with(
        registry,
        vec![profile],
        Arc::new(FixedNetwork { succeeds: false }),
        true,
    );
    let mut rx = h.handle.subscribe();

    assert!(h.handle.start_sync("cloud-cal", false).await.unwrap());
    let event = wait_for(&mut rx, is_finished("cloud-cal")).await;
    match event {
        SyncStatusEvent::Finished { results, .. } => {
            assert_eq!(results.minor_code, SyncMinorCode::ConnectionError);
        }
        _ => unreachable!(),
    }
}

// ---- inbound server sessions ---------------------------------------

/// Announces one inbound session for a fixed destination, reports it
/// successful, then idles until stopped.
struct AnnouncingServer {
    destination: String,
}

impl ServerPlugin for AnnouncingServer {
    fn name(&self) -> &str {
        "obex"
    }

    fn run(&mut self, ctl: &WorkerControl, events: &EventSink) -> Result<(), SyncFailure> {
        events.new_session(self.destination.clone());
        events.session_success("inbound sync finished");
        while !ctl.stop_requested() {
            ctl.wait_while_suspended();
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

#[tokio::test]
async fn inbound_session_for_unknown_destination_persists_temp_profile() {
    let mut registry = PluginRegistry::new();
    registry.register_server("obex", |_| {
        Box::new(AnnouncingServer {
            destination: "00:11:22:33:44:55".to_string(),
        })
    });
    let mut server_profile = SyncProfile::new("bt-server", "unused");
    server_profile.client_profile = None;
    server_profile.server_profile = Some("obex".to_string());
    let h = harness(registry, vec![server_profile]);
    let mut rx = h.handle.subscribe();

    let event = wait_for(&mut rx, is_finished("00:11:22:33:44:55")).await;
    match event {
        SyncStatusEvent::Finished { state, results, .. } => {
            assert_eq!(state, SessionState::Done);
            assert!(results.is_success());
        }
        _ => unreachable!(),
    }
    // The temporary profile earned persistence by succeeding.
    let saved = h.store.sync_profile("00:11:22:33:44:55").unwrap();
    assert!(saved.hidden);

    h.handle.shutdown().await.unwrap();
}

// ---- sync on change ------------------------------------------------

#[tokio::test]
async fn storage_change_is_debounced_into_one_sync() {
    let mut registry = PluginRegistry::new();
    registry.register_client("notes-plugin", |_| Box::new(ScriptedPlugin::success()));
    let mut profile = SyncProfile::new("notes-sync", "notes-plugin");
    profile.storage_backends = storages(&["notes"]);
    let h = harness(registry, vec![profile]);
    let mut rx = h.handle.subscribe();

    h.handle.storage_changed("notes").await.unwrap();
    h.handle.storage_changed("notes").await.unwrap();
    h.handle.storage_changed("notes").await.unwrap();

    wait_for(&mut rx, is_finished("notes-sync")).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.store.results_history("notes-sync").len(), 1);
}

// ---- profile removal and shutdown ----------------------------------

#[tokio::test]
async fn remove_profile_runs_cleanup_and_refuses_while_active() {
    let gate = Arc::new(AtomicBool::new(false));
    let cleaned = Arc::new(AtomicBool::new(false));
    let plugin_gate = gate.clone();
    let plugin_cleaned = cleaned.clone();
    let mut registry = PluginRegistry::new();
    registry.register_client("caldav", move |_| {
        Box::new(ScriptedPlugin {
            gate: Some(plugin_gate.clone()),
            outcome: Outcome::Success,
            cleanup_flag: Some(plugin_cleaned.clone()),
        })
    });
    let h = harness(registry, vec![SyncProfile::new("cal-sync", "caldav")]);
    let mut rx = h.handle.subscribe();

    assert!(h.handle.start_sync("cal-sync", false).await.unwrap());
    wait_for(&mut rx, is_started("cal-sync")).await;
    assert!(!h.handle.remove_profile("cal-sync").await.unwrap());

    gate.store(true, Ordering::SeqCst);
    wait_for(&mut rx, is_finished("cal-sync")).await;
    assert!(h.handle.remove_profile("cal-sync").await.unwrap());
    assert!(cleaned.load(Ordering::SeqCst));
    assert!(h.store.sync_profile("cal-sync").is_none());
}

#[tokio::test]
async fn shutdown_cancels_active_sessions_and_ends_the_loop() {
    let gate = Arc::new(AtomicBool::new(false));
    let plugin_gate = gate.clone();
    let mut registry = PluginRegistry::new();
    registry.register_client("caldav", move |_| {
        Box::new(ScriptedPlugin::gated(plugin_gate.clone()))
    });
    let h = harness(registry, vec![SyncProfile::new("cal-sync", "caldav")]);
    let mut rx = h.handle.subscribe();

    assert!(h.handle.start_sync("cal-sync", false).await.unwrap());
    wait_for(&mut rx, is_started("cal-sync")).await;

    h.handle.shutdown().await.unwrap();
    let last = h.store.last_results("cal-sync").unwrap();
    assert_eq!(last.major_code, SyncMajorCode::Cancelled);
    assert!(h.handle.start_sync("cal-sync", false).await.is_err());
}
