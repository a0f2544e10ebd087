//! The channel registry.
//!
//! [`ChannelRegistry`] associates each configured [`ChannelAdapter`] with its
//! enable/cooldown settings and its [`ChannelStatus`]. Every channel's status
//! sits behind its own lock: dispatch tasks for different channels never
//! contend, and the registry map lock is only taken to look channels up or
//! to change membership.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channels::{ChannelAdapter, ChannelOutcome};
use crate::error::{AlertError, Result};
use crate::types::{AlertKind, AlertLevel};

/// Per-channel settings the core acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Whether the channel takes part in dispatch.
    pub enabled: bool,
    /// Advisory minimum spacing between periodic sends, in seconds.
    pub cooldown_secs: u64,
    /// Only fire on true level transitions.
    pub escalation_only: bool,
    /// Take part in the periodic re-alert path.
    pub periodic: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_secs: 60,
            escalation_only: false,
            periodic: false,
        }
    }
}

impl ChannelSettings {
    /// Returns the cooldown as a [`Duration`].
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Returns true if a message of `kind` should go to this channel.
    #[must_use]
    pub const fn accepts(&self, kind: AlertKind) -> bool {
        if !self.enabled {
            return false;
        }
        match kind {
            AlertKind::Periodic => self.periodic,
            AlertKind::Resolved => false,
            kind => kind.is_transition() || !self.escalation_only,
        }
    }
}

/// Best-known state of one channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ChannelStatus {
    /// Whether the last probe or send succeeded.
    pub available: bool,
    /// When a send was last attempted.
    pub last_attempt: Option<DateTime<Utc>>,
    /// When a send last succeeded.
    pub last_success: Option<DateTime<Utc>>,
    /// Level of the last message sent; reset to NORMAL when the alert resolves.
    pub last_level: AlertLevel,
    /// Reason of the most recent failure.
    pub last_error: Option<String>,
    /// Number of successful sends.
    pub deliveries: u64,
    /// Number of failed sends.
    pub failures: u64,
}

/// A registered channel: adapter plus its settings and status.
#[derive(Debug)]
pub struct Channel {
    name: String,
    adapter: Arc<dyn ChannelAdapter>,
    settings: Mutex<ChannelSettings>,
    status: Mutex<ChannelStatus>,
    cooldown_mark: Mutex<Option<Instant>>,
}

impl Channel {
    fn new(adapter: Arc<dyn ChannelAdapter>, settings: ChannelSettings) -> Self {
        Self {
            name: adapter.name().to_string(),
            adapter,
            settings: Mutex::new(settings),
            status: Mutex::new(ChannelStatus::default()),
            cooldown_mark: Mutex::new(None),
        }
    }

    /// Returns the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the adapter.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn ChannelAdapter> {
        &self.adapter
    }

    /// Returns a copy of the settings.
    #[must_use]
    pub fn settings(&self) -> ChannelSettings {
        *self.settings.lock()
    }

    /// Returns a copy of the status.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        self.status.lock().clone()
    }

    pub(crate) fn record_attempt(&self, level: AlertLevel) {
        *self.cooldown_mark.lock() = Some(Instant::now());
        let mut status = self.status.lock();
        status.last_attempt = Some(Utc::now());
        status.last_level = level;
    }

    pub(crate) fn record_outcome(&self, outcome: &ChannelOutcome) {
        let mut status = self.status.lock();
        match outcome {
            ChannelOutcome::Delivered => {
                status.available = true;
                status.last_success = Some(Utc::now());
                status.last_error = None;
                status.deliveries += 1;
            }
            ChannelOutcome::Failed(reason) => {
                status.available = false;
                status.last_error = Some(reason.clone());
                status.failures += 1;
            }
        }
    }

    pub(crate) fn record_probe(&self, available: bool) {
        self.status.lock().available = available;
    }

    /// Claims the cooldown window if it has elapsed.
    pub(crate) fn try_reserve_cooldown(&self, now: Instant) -> bool {
        let cooldown = self.settings().cooldown();
        let mut mark = self.cooldown_mark.lock();
        if mark.is_none_or(|last| now.saturating_duration_since(last) >= cooldown) {
            *mark = Some(now);
            true
        } else {
            false
        }
    }

    pub(crate) fn clear_escalation(&self) {
        *self.cooldown_mark.lock() = None;
        self.status.lock().last_level = AlertLevel::Normal;
    }
}

/// Settings and status of a channel, merged for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    /// Channel settings.
    #[serde(flatten)]
    pub settings: ChannelSettings,
    /// Channel status.
    #[serde(flatten)]
    pub status: ChannelStatus,
}

/// The set of configured channels.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<BTreeMap<String, Arc<Channel>>>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its own name.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::DuplicateChannel` if the name is taken and
    /// `AlertError::InvalidConfig` if it is empty.
    pub fn register(
        &self,
        adapter: Arc<dyn ChannelAdapter>,
        settings: ChannelSettings,
    ) -> Result<()> {
        let name = adapter.name().to_string();
        if name.trim().is_empty() {
            return Err(AlertError::config("channel names cannot be empty"));
        }

        let mut channels = self.channels.write();
        if channels.contains_key(&name) {
            return Err(AlertError::DuplicateChannel { name });
        }

        info!(
            channel = %name,
            enabled = settings.enabled,
            cooldown_secs = settings.cooldown_secs,
            escalation_only = settings.escalation_only,
            "registered notification channel"
        );
        channels.insert(name, Arc::new(Channel::new(adapter, settings)));
        Ok(())
    }

    /// Removes a channel. Returns `true` if it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.channels.write().remove(name).is_some();
        if removed {
            info!(channel = %name, "removed notification channel");
        }
        removed
    }

    /// Returns the number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Returns true if no channels are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Returns the registered channel names in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    /// Returns a registered channel.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.read().get(name).cloned()
    }

    /// Returns every enabled channel.
    #[must_use]
    pub fn enabled_channels(&self) -> Vec<Arc<Channel>> {
        self.channels
            .read()
            .values()
            .filter(|c| c.settings().enabled)
            .cloned()
            .collect()
    }

    /// Returns the enabled channels that accept messages of `kind`.
    #[must_use]
    pub fn channels_for(&self, kind: AlertKind) -> Vec<Arc<Channel>> {
        self.channels
            .read()
            .values()
            .filter(|c| c.settings().accepts(kind))
            .cloned()
            .collect()
    }

    /// Returns the number of enabled channels.
    #[must_use]
    pub fn enabled_count(&self) -> usize {
        self.enabled_channels().len()
    }

    /// Enables or disables a channel.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::UnknownChannel` if no such channel is registered.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let channel = self.require(name)?;
        channel.settings.lock().enabled = enabled;
        info!(channel = %name, enabled, "channel enable flag changed");
        Ok(())
    }

    /// Changes a channel's advisory cooldown.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::UnknownChannel` if no such channel is registered.
    pub fn set_cooldown(&self, name: &str, cooldown_secs: u64) -> Result<()> {
        let channel = self.require(name)?;
        channel.settings.lock().cooldown_secs = cooldown_secs;
        debug!(channel = %name, cooldown_secs, "channel cooldown changed");
        Ok(())
    }

    /// Returns the merged settings and status of every channel.
    #[must_use]
    pub fn status_snapshot(&self) -> BTreeMap<String, ChannelSnapshot> {
        self.channels
            .read()
            .iter()
            .map(|(name, channel)| {
                (
                    name.clone(),
                    ChannelSnapshot {
                        settings: channel.settings(),
                        status: channel.status(),
                    },
                )
            })
            .collect()
    }

    /// Probes every channel concurrently and records availability.
    ///
    /// A probe that does not answer within `timeout` counts as unavailable.
    /// Must be called from within a Tokio runtime.
    pub async fn probe_all(&self, timeout: Duration) -> BTreeMap<String, bool> {
        let channels: Vec<Arc<Channel>> = self.channels.read().values().cloned().collect();

        let handles: Vec<_> = channels
            .into_iter()
            .map(|channel| {
                let name = channel.name().to_string();
                let handle = tokio::spawn(async move {
                    let available = tokio::time::timeout(timeout, channel.adapter().probe())
                        .await
                        .unwrap_or(false);
                    channel.record_probe(available);
                    available
                });
                (name, handle)
            })
            .collect();

        let mut results = BTreeMap::new();
        for (name, handle) in handles {
            let available = match handle.await {
                Ok(available) => available,
                Err(e) => {
                    warn!(channel = %name, error = %e, "channel probe task failed");
                    if let Some(channel) = self.get(&name) {
                        channel.record_probe(false);
                    }
                    false
                }
            };
            debug!(channel = %name, available, "probed channel");
            results.insert(name, available);
        }
        results
    }

    /// Clears per-channel escalation bookkeeping after an alert resolves.
    pub fn clear_escalation(&self) {
        for channel in self.channels.read().values() {
            channel.clear_escalation();
        }
    }

    fn require(&self, name: &str) -> Result<Arc<Channel>> {
        self.get(name).ok_or_else(|| AlertError::UnknownChannel {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelFuture, LogChannel};
    use crate::types::AlertMessage;

    #[derive(Debug)]
    struct DownChannel;

    impl ChannelAdapter for DownChannel {
        fn name(&self) -> &str {
            "down"
        }

        fn send<'a>(&'a self, _message: &'a AlertMessage) -> ChannelFuture<'a, ChannelOutcome> {
            Box::pin(async { ChannelOutcome::failure("unreachable") })
        }

        fn probe(&self) -> ChannelFuture<'_, bool> {
            Box::pin(async { false })
        }
    }

    fn registry() -> ChannelRegistry {
        let registry = ChannelRegistry::new();
        registry
            .register(Arc::new(LogChannel::new("log")), ChannelSettings::default())
            .unwrap();
        registry
            .register(Arc::new(DownChannel), ChannelSettings::default())
            .unwrap();
        registry
    }

    mod settings_tests {
        use super::*;

        #[test]
        fn disabled_accepts_nothing() {
            let settings = ChannelSettings {
                enabled: false,
                ..ChannelSettings::default()
            };
            assert!(!settings.accepts(AlertKind::Transition));
            assert!(!settings.accepts(AlertKind::Test));
        }

        #[test]
        fn escalation_only_skips_significant() {
            let settings = ChannelSettings {
                escalation_only: true,
                ..ChannelSettings::default()
            };
            assert!(settings.accepts(AlertKind::Transition));
            assert!(!settings.accepts(AlertKind::Significant));
        }

        #[test]
        fn periodic_requires_opt_in() {
            let settings = ChannelSettings::default();
            assert!(!settings.accepts(AlertKind::Periodic));
            let periodic = ChannelSettings {
                periodic: true,
                ..settings
            };
            assert!(periodic.accepts(AlertKind::Periodic));
        }

        #[test]
        fn resolved_is_never_sent_to_channels() {
            assert!(!ChannelSettings::default().accepts(AlertKind::Resolved));
        }
    }

    mod registration_tests {
        use super::*;

        #[test]
        fn register_and_list() {
            let registry = registry();
            assert_eq!(registry.len(), 2);
            assert_eq!(registry.names(), vec!["down".to_string(), "log".to_string()]);
        }

        #[test]
        fn duplicate_is_rejected() {
            let registry = registry();
            let result =
                registry.register(Arc::new(LogChannel::new("log")), ChannelSettings::default());
            assert!(matches!(result, Err(AlertError::DuplicateChannel { .. })));
        }

        #[test]
        fn empty_name_is_rejected() {
            let registry = ChannelRegistry::new();
            let result =
                registry.register(Arc::new(LogChannel::new("")), ChannelSettings::default());
            assert!(result.is_err());
        }

        #[test]
        fn unregister() {
            let registry = registry();
            assert!(registry.unregister("log"));
            assert!(!registry.unregister("log"));
            assert_eq!(registry.len(), 1);
        }
    }

    mod settings_change_tests {
        use super::*;

        #[test]
        fn set_enabled_filters_channels() {
            let registry = registry();
            registry.set_enabled("down", false).unwrap();
            let names: Vec<_> = registry
                .channels_for(AlertKind::Transition)
                .iter()
                .map(|c| c.name().to_string())
                .collect();
            assert_eq!(names, vec!["log".to_string()]);
            assert_eq!(registry.enabled_count(), 1);
            assert_eq!(registry.enabled_channels().len(), 1);
        }

        #[test]
        fn set_cooldown() {
            let registry = registry();
            registry.set_cooldown("log", 5).unwrap();
            assert_eq!(registry.status_snapshot()["log"].settings.cooldown_secs, 5);
        }

        #[test]
        fn unknown_channel_errors() {
            let registry = registry();
            assert!(matches!(
                registry.set_enabled("pager", true),
                Err(AlertError::UnknownChannel { .. })
            ));
            assert!(registry.set_cooldown("pager", 1).is_err());
        }
    }

    mod status_tests {
        use super::*;

        #[test]
        fn outcomes_update_status() {
            let registry = registry();
            let channel = registry.get("log").unwrap();

            channel.record_attempt(AlertLevel::Danger);
            channel.record_outcome(&ChannelOutcome::Delivered);
            let status = channel.status();
            assert!(status.available);
            assert!(status.last_attempt.is_some());
            assert_eq!(status.last_level, AlertLevel::Danger);
            assert_eq!(status.deliveries, 1);

            channel.record_outcome(&ChannelOutcome::failure("boom"));
            let status = channel.status();
            assert!(!status.available);
            assert_eq!(status.last_error.as_deref(), Some("boom"));
            assert_eq!(status.failures, 1);
        }

        #[test]
        fn cooldown_reservation() {
            let registry = registry();
            registry.set_cooldown("log", 60).unwrap();
            let channel = registry.get("log").unwrap();
            let now = Instant::now();

            assert!(channel.try_reserve_cooldown(now));
            assert!(!channel.try_reserve_cooldown(now + Duration::from_secs(30)));
            assert!(channel.try_reserve_cooldown(now + Duration::from_secs(61)));
        }

        #[test]
        fn clear_escalation_resets_bookkeeping() {
            let registry = registry();
            let channel = registry.get("log").unwrap();
            channel.record_attempt(AlertLevel::Critical);
            assert!(!channel.try_reserve_cooldown(Instant::now()));

            registry.clear_escalation();
            assert_eq!(channel.status().last_level, AlertLevel::Normal);
            assert!(channel.try_reserve_cooldown(Instant::now()));
        }

        #[test]
        fn snapshot_serializes_flat() {
            let registry = registry();
            let json = serde_json::to_value(registry.status_snapshot()).unwrap();
            assert_eq!(json["log"]["enabled"], true);
            assert_eq!(json["log"]["available"], false);
            assert_eq!(json["log"]["last_level"], "NORMAL");
        }
    }

    mod probe_tests {
        use super::*;

        #[tokio::test]
        async fn probe_records_availability() {
            let registry = registry();
            let results = registry.probe_all(Duration::from_secs(1)).await;

            assert_eq!(results.get("log"), Some(&true));
            assert_eq!(results.get("down"), Some(&false));
            assert!(registry.get("log").unwrap().status().available);
            assert!(!registry.get("down").unwrap().status().available);
        }
    }
}
