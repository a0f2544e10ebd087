//! Error types for the hydro-alerts crate.
//!
//! Channel delivery failures are deliberately absent: adapters report them
//! as [`ChannelOutcome::Failed`](crate::channels::ChannelOutcome::Failed) and
//! they never travel back into the evaluator or coordinator.

use thiserror::Error;

/// Errors that can occur while configuring the alerting core.
#[derive(Debug, Error)]
pub enum AlertError {
    /// A configuration value is missing or out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// The threshold table is not strictly increasing or contains non-finite values.
    #[error("invalid thresholds: {reason}")]
    InvalidThresholds {
        /// The reason the thresholds were rejected.
        reason: String,
    },

    /// No channel with the given name is registered.
    #[error("unknown channel: {name}")]
    UnknownChannel {
        /// The channel name that was not found.
        name: String,
    },

    /// A channel with the same name is already registered.
    #[error("channel already registered: {name}")]
    DuplicateChannel {
        /// The duplicated channel name.
        name: String,
    },

    /// An alert level could not be parsed.
    #[error("invalid alert level: {value}")]
    InvalidLevel {
        /// The rejected input.
        value: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error while reading configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl AlertError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;
