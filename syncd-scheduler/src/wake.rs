//! Wake-up scheduling over pluggable timer backends.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::Result;

/// Fired by a backend when a profile's wake time is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeEvent {
    /// The profile's scheduled wake-up is due.
    Due { profile: String },
    /// A rush/off-peak boundary was crossed; the schedule should be
    /// recomputed (background-activity backend only).
    SwitchDue { profile: String },
}

/// Timer backend contract. One backend is active per deployment.
#[async_trait]
pub trait WakeBackend: Send {
    /// Arm a wake-up for `profile` at `when`, replacing any pending one.
    async fn arm(&mut self, profile: &str, when: DateTime<Utc>) -> Result<()>;

    /// Cancel the pending wake-up for `profile`, if any.
    async fn disarm(&mut self, profile: &str) -> Result<()>;

    /// Cancel every pending wake-up.
    async fn disarm_all(&mut self) -> Result<()>;

    /// Arm the secondary switch timer for a rush/off-peak boundary.
    /// Backends without a switch concept ignore this.
    async fn arm_switch(&mut self, _profile: &str, _when: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

/// Front of the wake machinery: tracks exactly one pending wake per
/// profile and delegates the actual timing to the configured backend.
pub struct WakeScheduler {
    backend: Box<dyn WakeBackend>,
    pending: HashMap<String, DateTime<Utc>>,
}

impl WakeScheduler {
    pub fn new(backend: Box<dyn WakeBackend>) -> Self {
        Self {
            backend,
            pending: HashMap::new(),
        }
    }

    /// Arm a wake-up. Re-arming with an unchanged time is a no-op;
    /// a different time replaces the pending entry.
    pub async fn arm(&mut self, profile: &str, when: DateTime<Utc>) -> Result<()> {
        if self.pending.get(profile) == Some(&when) {
            debug!(profile, %when, "wake already armed, skipping");
            return Ok(());
        }
        self.backend.arm(profile, when).await?;
        self.pending.insert(profile.to_string(), when);
        debug!(profile, %when, "wake armed");
        Ok(())
    }

    pub async fn arm_switch(&mut self, profile: &str, when: DateTime<Utc>) -> Result<()> {
        self.backend.arm_switch(profile, when).await
    }

    pub async fn disarm(&mut self, profile: &str) -> Result<()> {
        if self.pending.remove(profile).is_some() {
            debug!(profile, "wake disarmed");
        }
        self.backend.disarm(profile).await
    }

    pub async fn disarm_all(&mut self) -> Result<()> {
        self.pending.clear();
        self.backend.disarm_all().await
    }

    /// Bookkeeping hook: the owner calls this when it receives a due
    /// event so a later arm for the same time is not misread as pending.
    pub fn note_fired(&mut self, profile: &str) {
        self.pending.remove(profile);
    }

    /// Pending wake time for a profile, if armed.
    pub fn pending(&self, profile: &str) -> Option<DateTime<Utc>> {
        self.pending.get(profile).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
