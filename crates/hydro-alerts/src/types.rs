//! Core types for the alerting system.
//!
//! This module provides the fundamental types used throughout the hydro-alerts crate:
//! - [`AlertLevel`]: The ordered severity of the water level
//! - [`ThresholdTable`]: Reading values at which each level begins
//! - [`AlertKind`]: Why an alert was produced
//! - [`AlertEvent`]: An immutable record of a level change or dispatch
//! - [`AlertMessage`]: What a channel adapter is asked to deliver

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AlertError, Result};

/// The severity of the observed water level.
///
/// Levels are totally ordered; hysteresis and escalation decisions compare
/// them directly.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    /// Water is below the warning threshold.
    #[default]
    Normal = 0,
    /// Water has reached the warning threshold.
    Warning = 1,
    /// Water has reached the danger threshold.
    Danger = 2,
    /// Water has reached the critical threshold.
    Critical = 3,
}

impl AlertLevel {
    /// All levels in ascending order.
    pub const ALL: [Self; 4] = [Self::Normal, Self::Warning, Self::Danger, Self::Critical];

    /// Returns the level name as shown to operators.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Warning => "WARNING",
            Self::Danger => "DANGER",
            Self::Critical => "CRITICAL",
        }
    }

    /// Returns the dashboard colour for this level.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Normal => "#22c55e",
            Self::Warning => "#eab308",
            Self::Danger => "#f97316",
            Self::Critical => "#ef4444",
        }
    }

    /// Returns the numeric index of this level (0 for NORMAL).
    #[must_use]
    pub const fn index(&self) -> u8 {
        *self as u8
    }

    /// Returns the level for a numeric index.
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Normal),
            1 => Some(Self::Warning),
            2 => Some(Self::Danger),
            3 => Some(Self::Critical),
            _ => None,
        }
    }

    /// Returns true for any level above NORMAL.
    #[must_use]
    pub const fn is_alerting(&self) -> bool {
        !matches!(self, Self::Normal)
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Ok(index) = trimmed.parse::<u8>() {
            return Self::from_index(index).ok_or_else(|| AlertError::InvalidLevel {
                value: s.to_string(),
            });
        }

        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| AlertError::InvalidLevel {
                value: s.to_string(),
            })
    }
}

/// Reading values at which each alerting level begins.
///
/// The table must be strictly increasing; [`ThresholdTable::validate`]
/// enforces this and configuration loading calls it before anything else
/// sees the table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    /// Reading at which WARNING begins.
    pub warning: f64,
    /// Reading at which DANGER begins.
    pub danger: f64,
    /// Reading at which CRITICAL begins.
    pub critical: f64,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            warning: 150.0,
            danger: 260.0,
            critical: 290.0,
        }
    }
}

impl ThresholdTable {
    /// Creates a validated threshold table.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidThresholds` if any value is not finite or
    /// the values are not strictly increasing.
    pub fn new(warning: f64, danger: f64, critical: f64) -> Result<Self> {
        let table = Self {
            warning,
            danger,
            critical,
        };
        table.validate()?;
        Ok(table)
    }

    /// Checks that the table is finite and strictly increasing.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidThresholds` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("warning", self.warning),
            ("danger", self.danger),
            ("critical", self.critical),
        ] {
            if !value.is_finite() {
                return Err(AlertError::InvalidThresholds {
                    reason: format!("{name} threshold must be finite, got {value}"),
                });
            }
        }

        if self.danger <= self.warning {
            return Err(AlertError::InvalidThresholds {
                reason: format!(
                    "danger ({}) must be greater than warning ({})",
                    self.danger, self.warning
                ),
            });
        }

        if self.critical <= self.danger {
            return Err(AlertError::InvalidThresholds {
                reason: format!(
                    "critical ({}) must be greater than danger ({})",
                    self.critical, self.danger
                ),
            });
        }

        Ok(())
    }

    /// Returns the threshold at which `level` begins. NORMAL has none.
    #[must_use]
    pub const fn threshold(&self, level: AlertLevel) -> Option<f64> {
        match level {
            AlertLevel::Normal => None,
            AlertLevel::Warning => Some(self.warning),
            AlertLevel::Danger => Some(self.danger),
            AlertLevel::Critical => Some(self.critical),
        }
    }

    /// Returns the highest level whose threshold `reading` meets or exceeds.
    #[must_use]
    pub fn classify(&self, reading: f64) -> AlertLevel {
        if reading >= self.critical {
            AlertLevel::Critical
        } else if reading >= self.danger {
            AlertLevel::Danger
        } else if reading >= self.warning {
            AlertLevel::Warning
        } else {
            AlertLevel::Normal
        }
    }
}

/// Why an alert was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// The level changed to a non-NORMAL level.
    Transition,
    /// The level held but the reading moved by at least the significant-change threshold.
    Significant,
    /// The level returned to NORMAL.
    Resolved,
    /// Re-alert while a level is sustained and its cooldown has elapsed.
    Periodic,
    /// Operator-triggered verification alert.
    Test,
}

impl AlertKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transition => "transition",
            Self::Significant => "significant",
            Self::Resolved => "resolved",
            Self::Periodic => "periodic",
            Self::Test => "test",
        }
    }

    /// Returns true when this kind represents a true level transition.
    ///
    /// Escalation-only channels fire only for these.
    #[must_use]
    pub const fn is_transition(&self) -> bool {
        matches!(self, Self::Transition | Self::Test)
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable record of a level change or dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Unique identifier for this event.
    pub id: String,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Level before the event.
    pub old_level: AlertLevel,
    /// Level after the event.
    pub new_level: AlertLevel,
    /// The reading that produced the event.
    pub reading: f64,
    /// Human-readable description sent to channels.
    pub message: String,
    /// Why the event was produced.
    pub kind: AlertKind,
}

impl AlertEvent {
    /// Creates a new event, composing its message from the inputs.
    ///
    /// `baseline` is the reading of the previous dispatch; it is only used
    /// to describe the movement of a [`AlertKind::Significant`] event.
    #[must_use]
    pub fn new(
        kind: AlertKind,
        old_level: AlertLevel,
        new_level: AlertLevel,
        reading: f64,
        baseline: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            old_level,
            new_level,
            reading,
            message: compose_message(kind, old_level, new_level, reading, baseline),
            kind,
        }
    }

    /// Returns the short form of the id used by low-bandwidth channels.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

fn compose_message(
    kind: AlertKind,
    old_level: AlertLevel,
    new_level: AlertLevel,
    reading: f64,
    baseline: f64,
) -> String {
    match kind {
        AlertKind::Transition | AlertKind::Resolved => format!(
            "FLOOD ALERT [{new_level}]: Water level is {reading:.0} cm. Previous level: {old_level}."
        ),
        AlertKind::Significant => {
            let delta = reading - baseline;
            let direction = if delta >= 0.0 { "up" } else { "down" };
            format!(
                "FLOOD ALERT [{new_level}]: Water level is {reading:.0} cm, {direction} {:.0} cm since last alert.",
                delta.abs()
            )
        }
        AlertKind::Periodic => {
            format!("ONGOING ALERT [{new_level}]: Water level at {reading:.0} cm.")
        }
        AlertKind::Test => format!(
            "TEST ALERT [{new_level}]: Water level is {reading:.0} cm. Previous level: {old_level}."
        ),
    }
}

/// The payload handed to a channel adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    /// Identifier of the originating event.
    pub event_id: String,
    /// Level being announced.
    pub level: AlertLevel,
    /// Reading being announced.
    pub reading: f64,
    /// Why the message is being sent.
    pub kind: AlertKind,
    /// Ready-to-send text.
    pub text: String,
    /// When the message was composed.
    pub timestamp: DateTime<Utc>,
}

impl AlertMessage {
    /// Builds the channel message for a recorded event.
    #[must_use]
    pub fn from_event(event: &AlertEvent) -> Self {
        Self {
            event_id: event.id.clone(),
            level: event.new_level,
            reading: event.reading,
            kind: event.kind,
            text: event.message.clone(),
            timestamp: event.timestamp,
        }
    }

    /// Builds an `ONGOING ALERT` message for a sustained level.
    #[must_use]
    pub fn periodic(level: AlertLevel, reading: f64) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            level,
            reading,
            kind: AlertKind::Periodic,
            text: compose_message(AlertKind::Periodic, level, level, reading, reading),
            timestamp: Utc::now(),
        }
    }

    /// Returns the short form of the event id.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.event_id.get(..8).unwrap_or(&self.event_id)
    }
}
