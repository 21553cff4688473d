//! Retry and wake-up scheduling.
//!
//! [`RetryScheduler`] tracks per-profile retry campaigns; the
//! [`WakeScheduler`] arms at most one future wake-up per profile through
//! one of three interchangeable backends selected at startup.

pub mod alarm_store;
pub mod background;
pub mod errors;
pub mod heartbeat;
pub mod retry;
pub mod wake;

pub use alarm_store::AlarmStoreBackend;
pub use background::BackgroundActivityBackend;
pub use errors::{Result, SchedulerError};
pub use heartbeat::HeartbeatBackend;
pub use retry::RetryScheduler;
pub use wake::{WakeBackend, WakeEvent, WakeScheduler};
