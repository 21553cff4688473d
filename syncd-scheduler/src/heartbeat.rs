//! Heartbeat wake backend.
//!
//! Wake-ups are coalesced onto shared slot boundaries: instead of an
//! exact timestamp, each profile gets a wait window `[min, max]` whose
//! lower edge is the requested delay rounded up to the next slot. Waits
//! from different profiles land on the same boundaries and the device
//! wakes once for all of them.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::errors::Result;
use crate::wake::{WakeBackend, WakeEvent};

/// Default coalescing slot width.
pub const DEFAULT_SLOT: Duration = Duration::from_secs(30);

/// Round `delay` up to a slot boundary and return the `[min, max]`
/// wait window. A zero delay stays zero; the window is one slot wide.
fn wait_window(delay: Duration, slot: Duration) -> (Duration, Duration) {
    let slot_secs = slot.as_secs().max(1);
    let secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
    let min = secs.div_ceil(slot_secs) * slot_secs;
    (
        Duration::from_secs(min),
        Duration::from_secs(min + slot_secs),
    )
}

/// Heartbeat-style backend: one outstanding wait per profile, slot
/// aligned so concurrent waits coalesce.
pub struct HeartbeatBackend {
    tx: mpsc::Sender<WakeEvent>,
    slot: Duration,
    waits: HashMap<String, JoinHandle<()>>,
}

impl HeartbeatBackend {
    pub fn new(tx: mpsc::Sender<WakeEvent>) -> Self {
        Self::with_slot(tx, DEFAULT_SLOT)
    }

    pub fn with_slot(tx: mpsc::Sender<WakeEvent>, slot: Duration) -> Self {
        Self {
            tx,
            slot,
            waits: HashMap::new(),
        }
    }

    fn spawn_wait(&mut self, profile: &str, when: DateTime<Utc>, event: WakeEvent) {
        let delay = (when - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let (min, max) = wait_window(delay, self.slot);
        trace!(profile, min_secs = min.as_secs(), max_secs = max.as_secs(), "heartbeat wait");

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            // The wait may complete anywhere in [min, max]; the lower
            // edge is the common slot boundary, so fire there.
            tokio::time::sleep(min).await;
            let _ = tx.send(event).await;
        });
        if let Some(old) = self.waits.insert(profile.to_string(), handle) {
            old.abort();
        }
    }

    /// Number of profiles with an outstanding wait.
    pub fn wait_count(&self) -> usize {
        self.waits.values().filter(|h| !h.is_finished()).count()
    }
}

#[async_trait]
impl WakeBackend for HeartbeatBackend {
    async fn arm(&mut self, profile: &str, when: DateTime<Utc>) -> Result<()> {
        self.spawn_wait(
            profile,
            when,
            WakeEvent::Due {
                profile: profile.to_string(),
            },
        );
        Ok(())
    }

    async fn disarm(&mut self, profile: &str) -> Result<()> {
        if let Some(handle) = self.waits.remove(profile) {
            handle.abort();
            debug!(profile, "heartbeat wait cancelled");
        }
        Ok(())
    }

    async fn disarm_all(&mut self) -> Result<()> {
        for (_, handle) in self.waits.drain() {
            handle.abort();
        }
        Ok(())
    }
}

impl Drop for HeartbeatBackend {
    fn drop(&mut self) {
        for handle in self.waits.values() {
            handle.abort();
        }
    }
}
