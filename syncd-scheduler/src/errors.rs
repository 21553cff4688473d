//! Error types for scheduling.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("alarm database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
