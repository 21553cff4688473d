//! Sync profile data model.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the data of a sync job lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationType {
    /// Another device reachable over a local transport.
    Device,
    /// An online service reachable over the network.
    Online,
}

/// How a profile is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncType {
    /// Only runs when explicitly requested.
    Manual,
    /// Runs on a schedule, re-armed after every attempt.
    Scheduled,
}

/// Schedule descriptor for a scheduled profile.
///
/// The plain interval applies around the clock. An optional rush window
/// overrides it with a shorter interval between `rush_begin` and
/// `rush_end`; the wake scheduler uses the window boundaries as switch
/// points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSchedule {
    /// Normal sync interval in minutes. `None` disables periodic syncs.
    pub interval_mins: Option<u32>,
    /// Interval in minutes used inside the rush window.
    pub rush_interval_mins: Option<u32>,
    /// Start of the rush window (local wall clock).
    pub rush_begin: Option<NaiveTime>,
    /// End of the rush window (local wall clock).
    pub rush_end: Option<NaiveTime>,
}

impl SyncSchedule {
    /// Interval in effect at `at`, taking the rush window into account.
    pub fn interval_at(&self, at: DateTime<Utc>) -> Option<u32> {
        if self.in_rush_window(at) {
            self.rush_interval_mins.or(self.interval_mins)
        } else {
            self.interval_mins
        }
    }

    fn in_rush_window(&self, at: DateTime<Utc>) -> bool {
        match (self.rush_begin, self.rush_end) {
            (Some(begin), Some(end)) => {
                let t = at.time();
                if begin <= end {
                    t >= begin && t < end
                } else {
                    // Window wraps over midnight.
                    t >= begin || t < end
                }
            }
            _ => false,
        }
    }

    /// Next rush window boundary strictly after `at`, if a window is set.
    pub fn next_switch_time(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let (begin, end) = match (self.rush_begin, self.rush_end) {
            (Some(b), Some(e)) => (b, e),
            _ => return None,
        };
        let today = at.date_naive();
        let mut candidates = Vec::new();
        for day in [today, today.succ_opt()?] {
            for t in [begin, end] {
                let dt = day.and_time(t).and_utc();
                if dt > at {
                    candidates.push(dt);
                }
            }
        }
        candidates.into_iter().min()
    }
}

/// A named, persisted description of one sync job.
///
/// Consumed read-only by the orchestration engine; the engine only ever
/// writes results back through the profile store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProfile {
    pub name: String,
    pub enabled: bool,
    pub hidden: bool,
    pub sync_type: SyncType,
    pub destination: DestinationType,
    /// Remote endpoint address, used to match inbound server sessions.
    pub destination_address: Option<String>,
    /// Name of the client sub-profile (plugin) driving outbound syncs.
    pub client_profile: Option<String>,
    /// Name of the server sub-profile (plugin) accepting inbound syncs.
    pub server_profile: Option<String>,
    /// Storage backends this job touches; reserved for the session lifetime.
    pub storage_backends: Vec<String>,
    /// Retry delays in minutes consumed one per failed scheduled attempt.
    pub retry_delays_mins: Vec<u32>,
    pub schedule: SyncSchedule,
}

impl SyncProfile {
    /// Create a minimal manual profile bound to a client plugin.
    pub fn new(name: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            hidden: false,
            sync_type: SyncType::Manual,
            destination: DestinationType::Device,
            destination_address: None,
            client_profile: Some(client.into()),
            server_profile: None,
            storage_backends: Vec::new(),
            retry_delays_mins: Vec::new(),
            schedule: SyncSchedule::default(),
        }
    }

    /// A profile is valid when it has a name and exactly one of a client
    /// or server sub-profile.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
            && (self.client_profile.is_some() != self.server_profile.is_some())
    }

    /// The client-or-server sub-profile name, whichever is set.
    pub fn sub_profile_name(&self) -> Option<&str> {
        self.client_profile
            .as_deref()
            .or(self.server_profile.as_deref())
    }

    pub fn is_scheduled(&self) -> bool {
        self.sync_type == SyncType::Scheduled
    }

    /// Online destinations need a network path opened before starting.
    pub fn is_online_destination(&self) -> bool {
        self.destination == DestinationType::Online
    }

    pub fn has_retries(&self) -> bool {
        !self.retry_delays_mins.is_empty()
    }

    /// Compute the next scheduled sync time from the last run time.
    ///
    /// Returns `None` for manual profiles and profiles without an
    /// interval. A profile that has never run is due immediately.
    pub fn next_sync_time(&self, last_sync: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        if !self.is_scheduled() {
            return None;
        }
        let now = Utc::now();
        let interval = self.schedule.interval_at(now)?;
        match last_sync {
            None => Some(now),
            Some(last) => {
                let next = last + ChronoDuration::minutes(i64::from(interval));
                Some(next.max(now))
            }
        }
    }
}
