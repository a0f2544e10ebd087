//! Read-only status snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::ChannelSnapshot;
use crate::types::{AlertEvent, AlertLevel, ThresholdTable};

/// A consistent view of the alerting core for dashboards and operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Current alert level.
    pub level: AlertLevel,
    /// Display name of the current level.
    pub level_name: String,
    /// Display colour of the current level.
    pub level_color: String,
    /// Reading of the last dispatch; 0 while NORMAL.
    pub last_dispatched_reading: f64,
    /// Active thresholds.
    pub thresholds: ThresholdTable,
    /// Active hysteresis margin.
    pub hysteresis: f64,
    /// Active significant-change threshold.
    pub significant_change: f64,
    /// Whether a burst is running.
    pub bursting: bool,
    /// Settings and status of every channel.
    pub channels: BTreeMap<String, ChannelSnapshot>,
    /// The most recent events, oldest first.
    pub history: Vec<AlertEvent>,
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Returns the number of channels currently believed available.
    #[must_use]
    pub fn available_channels(&self) -> usize {
        self.channels.values().filter(|c| c.status.available).count()
    }

    /// Returns true if the level is above NORMAL.
    #[must_use]
    pub const fn is_alerting(&self) -> bool {
        self.level.is_alerting()
    }
}
