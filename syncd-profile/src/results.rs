//! Result records persisted after every session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall outcome of a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMajorCode {
    Success,
    Failed,
    Cancelled,
}

/// Failure detail accompanying a `Failed` or `Cancelled` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMinorCode {
    NoError,
    InternalError,
    ConnectionError,
    LowBattery,
    Aborted,
    NotPossible,
    /// Plugin-reported error code, passed through unchanged.
    PluginError(i32),
}

/// One persisted result record. Every terminal session state produces
/// exactly one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResults {
    pub major_code: SyncMajorCode,
    pub minor_code: SyncMinorCode,
    pub message: String,
    pub sync_time: DateTime<Utc>,
    /// Whether the attempt was scheduler-triggered rather than manual.
    pub scheduled: bool,
    /// Remote target id learned during the session, if any.
    pub target_id: Option<String>,
}

impl SyncResults {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            major_code: SyncMajorCode::Success,
            minor_code: SyncMinorCode::NoError,
            message: message.into(),
            sync_time: Utc::now(),
            scheduled: false,
            target_id: None,
        }
    }

    pub fn failure(minor: SyncMinorCode, message: impl Into<String>) -> Self {
        Self {
            major_code: SyncMajorCode::Failed,
            minor_code: minor,
            message: message.into(),
            sync_time: Utc::now(),
            scheduled: false,
            target_id: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            major_code: SyncMajorCode::Cancelled,
            minor_code: SyncMinorCode::Aborted,
            message: String::new(),
            sync_time: Utc::now(),
            scheduled: false,
            target_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.major_code == SyncMajorCode::Success
    }
}

impl Default for SyncResults {
    fn default() -> Self {
        Self::failure(SyncMinorCode::InternalError, "no result recorded")
    }
}
