//! Custom error types for the application.
//!
//! This module defines the primary error type, `MeterError`, shared by the meter
//! adapter, the measurement repository, the actors and the retrieval service.
//! Using the `thiserror` crate, every failure path is a distinct variant so callers
//! can decide whether to retry, report "no data", or reject a request.
//!
//! ## Error Hierarchy
//!
//! - **`Transport`**: the serial session could not be opened, the exchange did not
//!   complete, or the poll deadline elapsed. Transient; the poller retries on its
//!   own cadence.
//! - **`Protocol`**: a response was received but could not be turned into a
//!   measurement. Treated as a failed poll, never fatal to the process.
//! - **`Storage`**: the repository failed to persist or load. Fatal to the
//!   operation that hit it.
//! - **`NotFound`**: the repository is empty or the requested key is unknown. A
//!   normal outcome that callers map to an absent result.
//! - **`BadParameter`**: an invalid page/size combination, rejected before the
//!   repository is touched.
//! - **`Config`** / **`Configuration`**: figment extraction failures and semantic
//!   validation failures respectively.
//! - **`FeatureNotEnabled`**: functionality compiled out via feature flags.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type MeterResult<T> = std::result::Result<T, MeterError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum MeterError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad parameter: {0}")]
    BadParameter(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl MeterError {
    /// Whether the failure belongs to a single poll and the next poll may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, MeterError::Transport(_) | MeterError::Protocol(_))
    }

    /// Whether the failure means "no data" rather than "something broke".
    pub fn is_not_found(&self) -> bool {
        matches!(self, MeterError::NotFound(_))
    }
}
