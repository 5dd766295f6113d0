//! Error types for resq-rs.

use thiserror::Error;

use crate::model::JobState;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid job arguments: {0}")]
    InvalidArgs(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("telemetry error: {0}")]
    Telemetry(String),
}

/// Failures of the connection pool itself, as opposed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("all connections are checked out")]
    Exhausted,

    #[error("timed out waiting for a connection")]
    Timeout,

    #[error("pool is closed")]
    Closed,
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Backend(e.to_string())
    }
}

impl Error {
    /// True when the error came from the store rather than from this process.
    pub fn is_backend(&self) -> bool {
        matches!(self, Error::Backend(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
