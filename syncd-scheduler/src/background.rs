//! Background-activity wake backend.
//!
//! Waits are mapped onto a fixed set of system-wide wakeup frequencies
//! so that many clients share the same wakeup instants. A wait shorter
//! than the smallest frequency, or longer than the largest, falls back
//! to a one-shot timer with the exact duration. Rush/off-peak boundary
//! switches always use an exact one-shot so the schedule flips on time.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::errors::Result;
use crate::wake::{WakeBackend, WakeEvent};

/// Shared wakeup frequencies, in seconds, ascending. 5 minutes up to
/// 24 hours.
const FREQUENCIES_SECS: &[u64] = &[
    300, 600, 900, 1800, 3600, 7200, 14400, 28800, 36000, 43200, 86400,
];

/// Largest shared frequency not exceeding `wait_secs`, or `None` when
/// the wait is outside the shared range and needs a one-shot timer.
fn frequency_for(wait_secs: u64) -> Option<u64> {
    if wait_secs < FREQUENCIES_SECS[0] || wait_secs > *FREQUENCIES_SECS.last().unwrap() {
        return None;
    }
    FREQUENCIES_SECS
        .iter()
        .rev()
        .find(|&&f| f <= wait_secs)
        .copied()
}

/// Background-activity backend: frequency-aligned waits per profile
/// plus exact one-shot switch timers.
pub struct BackgroundActivityBackend {
    tx: mpsc::Sender<WakeEvent>,
    waits: HashMap<String, JoinHandle<()>>,
    switches: HashMap<String, JoinHandle<()>>,
}

impl BackgroundActivityBackend {
    pub fn new(tx: mpsc::Sender<WakeEvent>) -> Self {
        Self {
            tx,
            waits: HashMap::new(),
            switches: HashMap::new(),
        }
    }

    fn spawn(&mut self, effective: Duration, event: WakeEvent) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(effective).await;
            let _ = tx.send(event).await;
        })
    }
}

#[async_trait]
impl WakeBackend for BackgroundActivityBackend {
    async fn arm(&mut self, profile: &str, when: DateTime<Utc>) -> Result<()> {
        let wait = (when - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let effective = match frequency_for(wait.as_secs()) {
            Some(freq) => {
                trace!(profile, wait_secs = wait.as_secs(), freq, "using shared frequency");
                Duration::from_secs(freq)
            }
            None => {
                trace!(profile, wait_secs = wait.as_secs(), "outside shared range, one-shot");
                wait
            }
        };
        let handle = self.spawn(
            effective,
            WakeEvent::Due {
                profile: profile.to_string(),
            },
        );
        if let Some(old) = self.waits.insert(profile.to_string(), handle) {
            old.abort();
        }
        Ok(())
    }

    async fn arm_switch(&mut self, profile: &str, when: DateTime<Utc>) -> Result<()> {
        let wait = (when - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let handle = self.spawn(
            wait,
            WakeEvent::SwitchDue {
                profile: profile.to_string(),
            },
        );
        if let Some(old) = self.switches.insert(profile.to_string(), handle) {
            old.abort();
        }
        Ok(())
    }

    async fn disarm(&mut self, profile: &str) -> Result<()> {
        if let Some(handle) = self.waits.remove(profile) {
            handle.abort();
            debug!(profile, "background wait cancelled");
        }
        if let Some(handle) = self.switches.remove(profile) {
            handle.abort();
        }
        Ok(())
    }

    async fn disarm_all(&mut self) -> Result<()> {
        for (_, handle) in self.waits.drain().chain(self.switches.drain()) {
            handle.abort();
        }
        Ok(())
    }
}

impl Drop for BackgroundActivityBackend {
    fn drop(&mut self) {
        for handle in self.waits.values().chain(self.switches.values()) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn frequency_selection_rounds_down() {
        assert_eq!(frequency_for(299), None);
        assert_eq!(frequency_for(300), Some(300));
        assert_eq!(frequency_for(599), Some(300));
        assert_eq!(frequency_for(600), Some(600));
        assert_eq!(frequency_for(3599), Some(1800));
        assert_eq!(frequency_for(3600), Some(3600));
        assert_eq!(frequency_for(86400), Some(86400));
        assert_eq!(frequency_for(86401), None);
    }

    #[tokio::test]
    async fn short_wait_fires_as_one_shot() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut backend = BackgroundActivityBackend::new(tx);
        backend.arm("mail", Utc::now()).await.unwrap();

        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("one-shot wait did not fire")
            .unwrap();
        assert_eq!(
            event,
            WakeEvent::Due {
                profile: "mail".to_string()
            }
        );
    }

    #[tokio::test]
    async fn switch_timer_is_independent_of_wait() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut backend = BackgroundActivityBackend::new(tx);

        backend
            .arm("mail", Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        backend.arm_switch("mail", Utc::now()).await.unwrap();

        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("switch timer did not fire")
            .unwrap();
        assert_eq!(
            event,
            WakeEvent::SwitchDue {
                profile: "mail".to_string()
            }
        );
        // The hour-away wait is still pending, not fired.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disarm_cancels_both_timers() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut backend = BackgroundActivityBackend::new(tx);

        backend.arm("mail", Utc::now()).await.unwrap();
        backend.arm_switch("mail", Utc::now()).await.unwrap();
        backend.disarm("mail").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
