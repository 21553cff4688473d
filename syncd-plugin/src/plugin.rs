//! Vendor plugin traits and the cooperative worker control block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use syncd_profile::SyncResults;

use crate::events::{ErrorStatus, EventSink};

/// Terminal status an abort request should steer the session towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortStatus {
    Aborted,
    NotPossible,
}

/// Failure reported by a plugin.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub status: ErrorStatus,
    pub message: String,
}

impl SyncFailure {
    pub fn aborted() -> Self {
        Self {
            status: ErrorStatus::Aborted,
            message: "sync aborted".to_string(),
        }
    }

    pub fn not_possible(message: impl Into<String>) -> Self {
        Self {
            status: ErrorStatus::NotPossible,
            message: message.into(),
        }
    }

    pub fn code(code: i32, message: impl Into<String>) -> Self {
        Self {
            status: ErrorStatus::Code(code),
            message: message.into(),
        }
    }
}

impl From<AbortStatus> for SyncFailure {
    fn from(status: AbortStatus) -> Self {
        match status {
            AbortStatus::Aborted => Self::aborted(),
            AbortStatus::NotPossible => Self::not_possible("sync not possible"),
        }
    }
}

/// Shared control block between a runner and its worker.
///
/// The worker polls this cooperatively; the runner never preempts a
/// running plugin.
#[derive(Default)]
pub struct WorkerControl {
    stop: AtomicBool,
    abort: Mutex<Option<AbortStatus>>,
    suspended: Mutex<bool>,
    resume_cond: Condvar,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to wind down. Set by `stop()`; also implied by an
    /// abort request.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // A suspended worker must wake up to observe the stop request.
        self.resume_cond.notify_all();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Forward a cancellation request to the plugin. The first request
    /// wins; later hints do not overwrite it.
    pub fn request_abort(&self, status: AbortStatus) {
        let mut abort = self.abort.lock().unwrap();
        abort.get_or_insert(status);
    }

    pub fn abort_requested(&self) -> Option<AbortStatus> {
        *self.abort.lock().unwrap()
    }

    /// Pause the worker at its next checkpoint (server runners only).
    pub fn suspend(&self) {
        *self.suspended.lock().unwrap() = true;
    }

    pub fn resume(&self) {
        *self.suspended.lock().unwrap() = false;
        self.resume_cond.notify_all();
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspended.lock().unwrap()
    }

    /// Block the worker thread while suspended. Returns immediately when
    /// a stop has been requested.
    pub fn wait_while_suspended(&self) {
        let mut suspended = self.suspended.lock().unwrap();
        while *suspended && !self.stop_requested() {
            suspended = self.resume_cond.wait(suspended).unwrap();
        }
    }
}

/// A plugin driving one outbound sync.
///
/// `sync` runs on a dedicated blocking worker thread and owns the plugin
/// exclusively until it returns. It must poll `ctl` at reasonable
/// checkpoints and return [`SyncFailure`] with
/// [`ErrorStatus::Aborted`](crate::events::ErrorStatus) once an abort
/// request is observed.
pub trait ClientPlugin: Send {
    fn name(&self) -> &str;

    fn sync(&mut self, ctl: &WorkerControl, events: &EventSink)
        -> Result<SyncResults, SyncFailure>;

    /// Remove plugin-side state (sync anchors) for a deleted profile.
    fn clean_up(&mut self) -> Result<(), SyncFailure> {
        Ok(())
    }
}

/// A plugin listening for inbound sessions.
///
/// `run` blocks for the lifetime of the server, announcing inbound
/// sessions and their outcomes through `events`. It must honor
/// suspension via [`WorkerControl::wait_while_suspended`] between
/// sessions and exit promptly once a stop is requested.
pub trait ServerPlugin: Send {
    fn name(&self) -> &str;

    fn run(&mut self, ctl: &WorkerControl, events: &EventSink) -> Result<(), SyncFailure>;

    fn clean_up(&mut self) -> Result<(), SyncFailure> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_abort_hint_wins() {
        let ctl = WorkerControl::new();
        assert_eq!(ctl.abort_requested(), None);

        ctl.request_abort(AbortStatus::NotPossible);
        ctl.request_abort(AbortStatus::Aborted);
        assert_eq!(ctl.abort_requested(), Some(AbortStatus::NotPossible));
    }

    #[test]
    fn stop_wakes_suspended_worker() {
        use std::sync::Arc;

        let ctl = Arc::new(WorkerControl::new());
        ctl.suspend();

        let worker_ctl = ctl.clone();
        let worker = std::thread::spawn(move || {
            worker_ctl.wait_while_suspended();
            worker_ctl.stop_requested()
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        ctl.request_stop();
        assert!(worker.join().unwrap());
    }
}
