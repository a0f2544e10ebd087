//! Notification channels for alert delivery.
//!
//! This module provides the [`ChannelAdapter`] trait that every delivery
//! medium implements, the typed [`ChannelOutcome`] adapters report, and a
//! [`LogChannel`] that writes alerts to `tracing`. Protocol-specific
//! adapters live outside this crate.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::types::{AlertKind, AlertLevel, AlertMessage};

/// Boxed future returned by [`ChannelAdapter`] methods.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ChannelOutcome {
    /// The adapter handed the message to its medium.
    Delivered,
    /// The attempt failed for the given reason.
    Failed(String),
}

impl ChannelOutcome {
    /// Creates a failed outcome.
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Returns true if the message was delivered.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Returns the failure reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Delivered => None,
            Self::Failed(reason) => Some(reason),
        }
    }
}

impl fmt::Display for ChannelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// The report of one adapter invocation inside a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryReport {
    /// Channel that was invoked.
    pub channel: String,
    /// What the adapter reported.
    pub outcome: ChannelOutcome,
    /// How long the attempt took.
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Trait for notification channel adapters.
///
/// Implement this trait to deliver alerts over a new medium. Adapters own
/// all protocol detail and session state; they must convert every internal
/// error into [`ChannelOutcome::Failed`] instead of panicking, and should
/// bound their own I/O with a timeout.
pub trait ChannelAdapter: Send + Sync + fmt::Debug {
    /// Returns the name of this channel.
    fn name(&self) -> &str;

    /// Attempts to deliver a message.
    fn send<'a>(&'a self, message: &'a AlertMessage) -> ChannelFuture<'a, ChannelOutcome>;

    /// Checks whether the channel is currently able to deliver.
    fn probe(&self) -> ChannelFuture<'_, bool> {
        Box::pin(async { true })
    }
}

/// A channel that logs alerts through `tracing`.
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    /// Creates a new log channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new("log")
    }
}

impl ChannelAdapter for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(&'a self, message: &'a AlertMessage) -> ChannelFuture<'a, ChannelOutcome> {
        Box::pin(async move {
            match (message.kind, message.level) {
                (AlertKind::Resolved, _) | (_, AlertLevel::Normal) => {
                    info!(
                        channel = %self.name,
                        id = %message.short_id(),
                        reading = message.reading,
                        "RESOLVED: {}",
                        message.text
                    );
                }
                (_, AlertLevel::Warning) => {
                    warn!(
                        channel = %self.name,
                        id = %message.short_id(),
                        level = %message.level,
                        reading = message.reading,
                        kind = %message.kind,
                        "ALERT: {}",
                        message.text
                    );
                }
                _ => {
                    error!(
                        channel = %self.name,
                        id = %message.short_id(),
                        level = %message.level,
                        reading = message.reading,
                        kind = %message.kind,
                        "ALERT: {}",
                        message.text
                    );
                }
            }
            ChannelOutcome::Delivered
        })
    }
}
