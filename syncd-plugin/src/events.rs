//! Events emitted by plugin runners.

use tokio::sync::mpsc;
use tracing::warn;

/// Classification of a plugin-reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// The plugin acknowledged a cancellation request.
    Aborted,
    /// The sync cannot be performed at all (unsupported peer, missing
    /// capability). Not eligible for retries.
    NotPossible,
    /// Plugin-specific error code.
    Code(i32),
}

/// Event posted by a plugin worker back to the owning event loop.
///
/// Events are immutable values; the worker never touches orchestrator
/// state directly. Delivery order is preserved per runner.
#[derive(Debug, Clone)]
pub enum PluginEvent {
    /// Sync progress notification.
    Progress { profile: String, detail: i32 },

    /// The plugin gained access to a storage backend; `data_kind` is the
    /// content type negotiated with the peer.
    StorageAcquired { profile: String, data_kind: String },

    /// The sync finished successfully.
    Success { profile: String, message: String },

    /// The sync failed or was aborted.
    Error {
        profile: String,
        message: String,
        status: ErrorStatus,
    },

    /// A server plugin accepted an inbound session from `destination`.
    NewSession {
        server_profile: String,
        destination: String,
    },

    /// The worker exited and handed the plugin back to the runner.
    Done { profile: String },
}

impl PluginEvent {
    /// Profile name the event is about.
    pub fn profile(&self) -> &str {
        match self {
            PluginEvent::Progress { profile, .. }
            | PluginEvent::StorageAcquired { profile, .. }
            | PluginEvent::Success { profile, .. }
            | PluginEvent::Error { profile, .. }
            | PluginEvent::Done { profile } => profile,
            PluginEvent::NewSession { server_profile, .. } => server_profile,
        }
    }
}

/// Sending half handed to a plugin while its worker runs.
///
/// All methods are callable from the blocking worker thread.
#[derive(Clone)]
pub struct EventSink {
    profile: String,
    tx: mpsc::Sender<PluginEvent>,
}

impl EventSink {
    pub fn new(profile: impl Into<String>, tx: mpsc::Sender<PluginEvent>) -> Self {
        Self {
            profile: profile.into(),
            tx,
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn progress(&self, detail: i32) {
        self.post(PluginEvent::Progress {
            profile: self.profile.clone(),
            detail,
        });
    }

    pub fn storage_acquired(&self, data_kind: impl Into<String>) {
        self.post(PluginEvent::StorageAcquired {
            profile: self.profile.clone(),
            data_kind: data_kind.into(),
        });
    }

    /// Server plugins announce an inbound session before driving it.
    pub fn new_session(&self, destination: impl Into<String>) {
        self.post(PluginEvent::NewSession {
            server_profile: self.profile.clone(),
            destination: destination.into(),
        });
    }

    /// Server plugins report the outcome of an inbound session mid-run.
    pub fn session_success(&self, message: impl Into<String>) {
        self.post(PluginEvent::Success {
            profile: self.profile.clone(),
            message: message.into(),
        });
    }

    /// Server-side counterpart of [`EventSink::session_success`].
    pub fn session_error(&self, message: impl Into<String>, status: ErrorStatus) {
        self.post(PluginEvent::Error {
            profile: self.profile.clone(),
            message: message.into(),
            status,
        });
    }

    fn post(&self, event: PluginEvent) {
        if self.tx.blocking_send(event).is_err() {
            warn!(profile = %self.profile, "event loop gone, dropping plugin event");
        }
    }
}
