//! Retry campaigns: per-profile backoff delay lists consumed one entry
//! per failed scheduled attempt.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use syncd_profile::SyncProfile;

struct RetryCampaign {
    /// Delay list captured at first failure; immutable for the campaign
    /// even if the profile is edited concurrently.
    delays_mins: Vec<u32>,
    cursor: usize,
}

/// Tracks one retry campaign per failing profile.
#[derive(Default)]
pub struct RetryScheduler {
    campaigns: HashMap<String, RetryCampaign>,
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. Captures the profile's delay list on the first
    /// failure of a campaign; later failures keep the captured list.
    pub fn note_failure(&mut self, profile: &SyncProfile) {
        if !profile.has_retries() {
            return;
        }
        self.campaigns
            .entry(profile.name.clone())
            .or_insert_with(|| {
                debug!(
                    profile = %profile.name,
                    delays = ?profile.retry_delays_mins,
                    "starting retry campaign"
                );
                RetryCampaign {
                    delays_mins: profile.retry_delays_mins.clone(),
                    cursor: 0,
                }
            });
    }

    /// Pop the next delay of the campaign, advancing the cursor. Returns
    /// `None` when no campaign exists or the delays are exhausted; an
    /// exhausted campaign is dropped.
    pub fn next_delay(&mut self, profile_name: &str) -> Option<Duration> {
        let campaign = self.campaigns.get_mut(profile_name)?;
        match campaign.delays_mins.get(campaign.cursor) {
            Some(&mins) => {
                campaign.cursor += 1;
                debug!(profile = profile_name, attempt = campaign.cursor, mins, "next retry delay");
                Some(Duration::from_secs(u64::from(mins) * 60))
            }
            None => {
                debug!(profile = profile_name, "retry campaign exhausted");
                self.campaigns.remove(profile_name);
                None
            }
        }
    }

    /// End a campaign (on success or explicit reset).
    pub fn clear(&mut self, profile_name: &str) {
        if self.campaigns.remove(profile_name).is_some() {
            debug!(profile = profile_name, "retry campaign cleared");
        }
    }

    pub fn has_campaign(&self, profile_name: &str) -> bool {
        self.campaigns.contains_key(profile_name)
    }
}
