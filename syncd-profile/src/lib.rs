//! Sync profile model and profile store interface.
//!
//! A profile describes one sync job: what plugin runs it, which storage
//! backends it touches, how it is scheduled and how failures are retried.
//! The orchestration engine consumes profiles read-only and records run
//! results back through the [`ProfileStore`] trait.

pub mod profile;
pub mod results;
pub mod store;

pub use profile::{DestinationType, SyncProfile, SyncSchedule, SyncType};
pub use results::{SyncMajorCode, SyncMinorCode, SyncResults};
pub use store::{InMemoryProfileStore, ProfileStore};
