//! Profile store collaborator interface.
//!
//! Persistence of profiles (XML files in the original deployment) is out
//! of scope for the orchestration engine; it only needs the narrow
//! contract below. The in-memory implementation backs the daemon default
//! configuration and the test suites.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::profile::{DestinationType, SyncProfile, SyncType};
use crate::results::SyncResults;

/// Read/record access to persisted sync profiles.
pub trait ProfileStore: Send + Sync {
    /// Load a profile by name.
    fn sync_profile(&self, name: &str) -> Option<SyncProfile>;

    /// All known profiles.
    fn all_sync_profiles(&self) -> Vec<SyncProfile>;

    /// Profiles whose destination address matches `address`.
    fn profiles_by_destination(&self, address: &str) -> Vec<SyncProfile>;

    /// Build a temporary profile for an unknown inbound destination.
    /// Not persisted until `save_profile` is called.
    fn create_temp_profile(&self, destination: &str) -> SyncProfile;

    /// Persist a profile (used for temporary profiles on success).
    fn save_profile(&self, profile: &SyncProfile);

    /// Remove a profile. Returns false when the profile is unknown.
    fn remove_profile(&self, name: &str) -> bool;

    /// Record the result of one session. Exactly one record per terminal
    /// state.
    fn save_results(&self, name: &str, results: &SyncResults);

    /// Most recent recorded result for a profile.
    fn last_results(&self, name: &str) -> Option<SyncResults>;

    /// Time of the last successful sync for a profile.
    fn last_sync_time(&self, name: &str) -> Option<DateTime<Utc>>;

    /// Record which storages were seen enabled during a session.
    fn enable_storages(&self, name: &str, storages: &HashMap<String, bool>);
}

#[derive(Default)]
struct StoreState {
    profiles: HashMap<String, SyncProfile>,
    results: HashMap<String, Vec<SyncResults>>,
    enabled_storages: HashMap<String, HashMap<String, bool>>,
}

/// In-memory profile store.
#[derive(Default)]
pub struct InMemoryProfileStore {
    state: Mutex<StoreState>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a profile.
    pub fn insert(&self, profile: SyncProfile) {
        let mut state = self.state.lock().unwrap();
        state.profiles.insert(profile.name.clone(), profile);
    }

    /// Full result history for a profile, oldest first.
    pub fn results_history(&self, name: &str) -> Vec<SyncResults> {
        let state = self.state.lock().unwrap();
        state.results.get(name).cloned().unwrap_or_default()
    }

    /// Storage-enabled map recorded for a profile, if any.
    pub fn enabled_storages(&self, name: &str) -> Option<HashMap<String, bool>> {
        let state = self.state.lock().unwrap();
        state.enabled_storages.get(name).cloned()
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn sync_profile(&self, name: &str) -> Option<SyncProfile> {
        let state = self.state.lock().unwrap();
        state.profiles.get(name).cloned()
    }

    fn all_sync_profiles(&self) -> Vec<SyncProfile> {
        let state = self.state.lock().unwrap();
        state.profiles.values().cloned().collect()
    }

    fn profiles_by_destination(&self, address: &str) -> Vec<SyncProfile> {
        let state = self.state.lock().unwrap();
        state
            .profiles
            .values()
            .filter(|p| p.destination_address.as_deref() == Some(address))
            .cloned()
            .collect()
    }

    fn create_temp_profile(&self, destination: &str) -> SyncProfile {
        let mut profile = SyncProfile::new(destination, "syncml");
        profile.sync_type = SyncType::Manual;
        profile.destination = DestinationType::Device;
        profile.destination_address = Some(destination.to_string());
        profile.hidden = true;
        debug!(profile = %profile.name, "created temporary profile");
        profile
    }

    fn save_profile(&self, profile: &SyncProfile) {
        let mut state = self.state.lock().unwrap();
        state
            .profiles
            .insert(profile.name.clone(), profile.clone());
    }

    fn remove_profile(&self, name: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        state.results.remove(name);
        state.enabled_storages.remove(name);
        state.profiles.remove(name).is_some()
    }

    fn save_results(&self, name: &str, results: &SyncResults) {
        debug!(profile = name, major = ?results.major_code, "recording sync results");
        let mut state = self.state.lock().unwrap();
        state
            .results
            .entry(name.to_string())
            .or_default()
            .push(results.clone());
    }

    fn last_results(&self, name: &str) -> Option<SyncResults> {
        let state = self.state.lock().unwrap();
        state.results.get(name).and_then(|r| r.last().cloned())
    }

    fn last_sync_time(&self, name: &str) -> Option<DateTime<Utc>> {
        let state = self.state.lock().unwrap();
        state
            .results
            .get(name)?
            .iter()
            .rev()
            .find(|r| r.is_success())
            .map(|r| r.sync_time)
    }

    fn enable_storages(&self, name: &str, storages: &HashMap<String, bool>) {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .enabled_storages
            .entry(name.to_string())
            .or_default();
        for (storage, enabled) in storages {
            entry.insert(storage.clone(), *enabled);
        }
    }
}
