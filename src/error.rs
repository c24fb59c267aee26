//! Errors raised by the persistence and analytics ports.
//!
//! Neither reaches callers of [`crate::PolicyEngine`]: the engine logs and
//! recovers from both.

use thiserror::Error;

/// Persistence channel errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bandit state I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bandit state encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("bandit state backend error: {0}")]
    Backend(String),
}

/// Analytics transport errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("event sink unavailable: {0}")]
    Unavailable(String),

    #[error("event encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
