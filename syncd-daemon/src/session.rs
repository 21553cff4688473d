//! Sync session: one attempt to run a profile's job.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use syncd_plugin::{PluginRunner, SyncFailure};
use syncd_profile::{SyncMinorCode, SyncProfile, SyncResults};

use crate::booker::StorageBooker;

/// Session lifecycle states. The five right-most variants are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Queued,
    Started,
    Progress,
    Done,
    Error,
    Aborted,
    Cancelled,
    NotPossible,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Done
                | SessionState::Error
                | SessionState::Aborted
                | SessionState::Cancelled
                | SessionState::NotPossible
        )
    }
}

/// Binds a profile to a runner and tracks its outcome.
///
/// A session holds at most one storage reservation at a time, acquired
/// for the full set of backends its profile declares and released when
/// the session reaches a terminal state. Sessions are never reused.
pub struct SyncSession {
    pub profile: SyncProfile,
    pub state: SessionState,
    /// Scheduler-triggered rather than manual.
    pub scheduled: bool,
    /// An abort was requested; a later success still ends as `Aborted`.
    pub aborted: bool,
    /// The profile was created for an unknown inbound destination and is
    /// persisted only if the session succeeds.
    pub profile_created: bool,
    pub runner: Option<Box<dyn PluginRunner>>,
    /// Storage names reserved by this session, empty until admission.
    reserved: Vec<String>,
    /// Storage-enabled flags learned from the plugin during the run.
    pub storage_map: HashMap<String, bool>,
    minor_code: SyncMinorCode,
    message: String,
}

impl SyncSession {
    pub fn new(profile: SyncProfile, scheduled: bool) -> Self {
        Self {
            profile,
            state: SessionState::Created,
            scheduled,
            aborted: false,
            profile_created: false,
            runner: None,
            reserved: Vec::new(),
            storage_map: HashMap::new(),
            minor_code: SyncMinorCode::NoError,
            message: String::new(),
        }
    }

    pub fn profile_name(&self) -> &str {
        &self.profile.name
    }

    /// Reserve the profile's storage backends, owned by this session.
    /// Idempotent while held; false when another owner holds any of them.
    pub fn reserve_storages(&mut self, booker: &StorageBooker) -> bool {
        if !self.reserved.is_empty() {
            return true;
        }
        if booker.reserve(&self.profile.storage_backends, &self.profile.name) {
            self.reserved = self.profile.storage_backends.clone();
            true
        } else {
            false
        }
    }

    pub fn release_storages(&mut self, booker: &StorageBooker) {
        if !self.reserved.is_empty() {
            booker.release(&self.reserved);
            self.reserved.clear();
        }
    }

    /// Record a locally detected failure and enter the `Error` state.
    pub fn fail(&mut self, minor: SyncMinorCode, message: impl Into<String>) {
        self.state = SessionState::Error;
        self.minor_code = minor;
        self.message = message.into();
    }

    /// Enter a terminal state reported by the plugin.
    pub fn finish(&mut self, state: SessionState, message: impl Into<String>) {
        debug_assert!(state.is_terminal());
        // A session that was asked to abort ends as aborted even if the
        // plugin managed to complete in the meantime.
        self.state = if self.aborted && state == SessionState::Done {
            SessionState::Aborted
        } else {
            state
        };
        self.message = message.into();
    }

    pub fn plugin_error(&mut self, failure: &SyncFailure) {
        use syncd_plugin::ErrorStatus;
        match failure.status {
            ErrorStatus::Aborted => self.finish(SessionState::Aborted, failure.message.clone()),
            ErrorStatus::NotPossible => {
                self.minor_code = SyncMinorCode::NotPossible;
                self.finish(SessionState::NotPossible, failure.message.clone());
            }
            ErrorStatus::Code(code) => {
                self.minor_code = SyncMinorCode::PluginError(code);
                self.finish(SessionState::Error, failure.message.clone());
            }
        }
    }

    /// Whether the terminal state counts as a plugin failure eligible for
    /// retry scheduling. Cancellations and impossibility are not.
    pub fn is_retryable_failure(&self) -> bool {
        self.state == SessionState::Error && self.minor_code != SyncMinorCode::LowBattery
    }

    /// Assemble the result record for this session's terminal state.
    pub fn results(&self) -> SyncResults {
        let mut results = match self.state {
            SessionState::Done => SyncResults::success(self.message.clone()),
            SessionState::Aborted | SessionState::Cancelled => {
                let mut res = SyncResults::cancelled();
                res.message = self.message.clone();
                res
            }
            SessionState::NotPossible => {
                SyncResults::failure(SyncMinorCode::NotPossible, self.message.clone())
            }
            SessionState::Error => SyncResults::failure(self.minor_code, self.message.clone()),
            state => {
                warn!(profile = %self.profile.name, ?state, "results requested before terminal state");
                SyncResults::default()
            }
        };
        results.scheduled = self.scheduled;
        results
    }
}

// Reservations are released through the orchestrator's completion
// handler; a session dropped while still holding one is a bug.
impl Drop for SyncSession {
    fn drop(&mut self) {
        if !self.reserved.is_empty() {
            warn!(
                profile = %self.profile.name,
                "session dropped while holding a storage reservation"
            );
        }
    }
}

/// Shared booker handle alias used throughout the daemon.
pub type SharedBooker = Arc<StorageBooker>;
