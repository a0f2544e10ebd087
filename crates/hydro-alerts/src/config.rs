//! Validated configuration for the alerting core.
//!
//! Configuration is loaded once (usually from a JSON file), validated, and
//! then handed to the evaluator, registry and coordinator constructors.
//! Channel-specific settings are carried as opaque JSON and only interpreted
//! by the adapter that owns the channel.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};
use crate::registry::ChannelSettings;
use crate::types::ThresholdTable;

/// Calibration parameters used to derive the significant-change threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Span of readings the camera is calibrated for.
    pub range: f64,
    /// Fraction of `range` that counts as a significant change.
    pub significant_fraction: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            range: 200.0,
            significant_fraction: 0.05,
        }
    }
}

impl CalibrationConfig {
    /// Returns the reading delta that triggers a same-level re-dispatch.
    #[must_use]
    pub fn significant_change(&self) -> f64 {
        self.range * self.significant_fraction
    }
}

/// Burst repetition parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    /// How many times every channel is attempted per trigger.
    pub attempts: u32,
    /// Delay between repetitions in milliseconds.
    pub interval_ms: u64,
    /// Upper bound on a single adapter `send`, in milliseconds.
    pub send_timeout_ms: u64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval_ms: 5_000,
            send_timeout_ms: 30_000,
        }
    }
}

impl BurstConfig {
    /// Returns the delay between repetitions.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Returns the per-send timeout.
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Configuration of one notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Adapter kind used to build the channel (for example `log`, `command`, `webhook`).
    pub kind: String,
    /// Whether the channel takes part in dispatch.
    pub enabled: bool,
    /// Advisory minimum spacing between periodic sends, in seconds.
    pub cooldown_secs: u64,
    /// Only fire on true level transitions, never on significance-only re-dispatch.
    pub escalation_only: bool,
    /// Take part in the periodic re-alert path.
    pub periodic: bool,
    /// Adapter-specific settings, opaque to the core.
    pub settings: serde_json::Value,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: "log".to_string(),
            enabled: true,
            cooldown_secs: 60,
            escalation_only: false,
            periodic: false,
            settings: serde_json::Value::Null,
        }
    }
}

impl ChannelConfig {
    /// Returns the part of this configuration the core acts on.
    #[must_use]
    pub const fn settings(&self) -> ChannelSettings {
        ChannelSettings {
            enabled: self.enabled,
            cooldown_secs: self.cooldown_secs,
            escalation_only: self.escalation_only,
            periodic: self.periodic,
        }
    }
}

/// Top-level alerting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Reading values at which each level begins.
    pub thresholds: ThresholdTable,
    /// Margin below the current level's threshold required before dropping.
    pub hysteresis: f64,
    /// Calibration range and significant-change fraction.
    pub calibration: CalibrationConfig,
    /// Burst repetition parameters.
    pub burst: BurstConfig,
    /// Maximum number of events kept in the history.
    pub history_capacity: usize,
    /// Number of recent events included in status snapshots.
    pub status_history: usize,
    /// Re-alert periodically while a level is sustained.
    pub periodic_realert: bool,
    /// Notification channels by name.
    pub channels: BTreeMap<String, ChannelConfig>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdTable::default(),
            hysteresis: 10.0,
            calibration: CalibrationConfig::default(),
            burst: BurstConfig::default(),
            history_capacity: 100,
            status_history: 10,
            periodic_realert: false,
            channels: BTreeMap::new(),
        }
    }
}

impl AlertConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AlertError::config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or validation fails.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Serialization` if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(AlertError::from)
    }

    /// Write the configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Io` if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut json = self.to_json_pretty()?;
        json.push('\n');
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        validate_hysteresis(self.hysteresis)?;
        validate_calibration(&self.calibration)?;

        if self.burst.attempts == 0 {
            return Err(AlertError::config("burst.attempts must be at least 1"));
        }

        if self.burst.send_timeout_ms == 0 {
            return Err(AlertError::config("burst.send_timeout_ms must be positive"));
        }

        if self.history_capacity == 0 {
            return Err(AlertError::config("history_capacity must be positive"));
        }

        for name in self.channels.keys() {
            if name.trim().is_empty() {
                return Err(AlertError::config("channel names cannot be empty"));
            }
        }

        Ok(())
    }

    /// Returns the significant-change threshold derived from calibration.
    #[must_use]
    pub fn significant_change(&self) -> f64 {
        self.calibration.significant_change()
    }

    /// A sample configuration with one channel of each built-in kind.
    #[must_use]
    pub fn sample() -> Self {
        let mut channels = BTreeMap::new();
        channels.insert("log".to_string(), ChannelConfig::default());
        channels.insert(
            "sms".to_string(),
            ChannelConfig {
                kind: "command".to_string(),
                cooldown_secs: 300,
                periodic: true,
                settings: serde_json::json!({
                    "program": "kdeconnect-cli",
                    "args": ["--send-sms", "{message}", "--destination", "{recipient}", "-n", "phone"],
                    "recipients": ["+10000000000"],
                    "probe_args": ["--list-devices"],
                    "timeout_secs": 15
                }),
                ..ChannelConfig::default()
            },
        );
        channels.insert(
            "chat".to_string(),
            ChannelConfig {
                kind: "webhook".to_string(),
                cooldown_secs: 120,
                escalation_only: true,
                settings: serde_json::json!({
                    "url": "http://127.0.0.1:7000/v1/alerts",
                    "token": null,
                    "timeout_secs": 10
                }),
                ..ChannelConfig::default()
            },
        );

        Self {
            channels,
            ..Self::default()
        }
    }
}

pub(crate) fn validate_hysteresis(hysteresis: f64) -> Result<()> {
    if !hysteresis.is_finite() || hysteresis < 0.0 {
        return Err(AlertError::config(format!(
            "hysteresis must be a non-negative number, got {hysteresis}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_calibration(calibration: &CalibrationConfig) -> Result<()> {
    if !calibration.range.is_finite() || calibration.range <= 0.0 {
        return Err(AlertError::config(format!(
            "calibration.range must be positive, got {}",
            calibration.range
        )));
    }

    if !(calibration.significant_fraction > 0.0 && calibration.significant_fraction <= 1.0) {
        return Err(AlertError::config(format!(
            "calibration.significant_fraction must be in (0, 1], got {}",
            calibration.significant_fraction
        )));
    }

    Ok(())
}
