//! The alert manager.
//!
//! [`AlertManager`] is the entry point of the crate. It owns the
//! [`LevelEvaluator`] and the [`DispatchCoordinator`], feeds each reading
//! through both, and exposes the operator controls and status view.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::info;

use crate::config::{AlertConfig, CalibrationConfig, validate_calibration};
use crate::coordinator::{Dispatch, DispatchCoordinator};
use crate::error::Result;
use crate::evaluator::LevelEvaluator;
use crate::observer::AlertObserver;
use crate::registry::ChannelRegistry;
use crate::status::StatusSnapshot;
use crate::types::{AlertEvent, AlertLevel, ThresholdTable};

/// Evaluates readings and dispatches alerts.
#[derive(Debug)]
pub struct AlertManager {
    evaluator: LevelEvaluator,
    coordinator: DispatchCoordinator,
    calibration: Mutex<CalibrationConfig>,
    status_history: usize,
    /// Keeps evaluator order and history order identical.
    ingest: Mutex<()>,
}

impl AlertManager {
    /// Creates a manager dispatching to the channels in `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &AlertConfig, registry: Arc<ChannelRegistry>) -> Result<Self> {
        config.validate()?;
        let evaluator = LevelEvaluator::from_config(config)?;
        let coordinator = DispatchCoordinator::new(registry, config);

        info!(
            warning = config.thresholds.warning,
            danger = config.thresholds.danger,
            critical = config.thresholds.critical,
            hysteresis = config.hysteresis,
            significant_change = config.significant_change(),
            channels = coordinator.registry().len(),
            "alert manager initialized"
        );

        Ok(Self {
            evaluator,
            coordinator,
            calibration: Mutex::new(config.calibration),
            status_history: config.status_history,
            ingest: Mutex::new(()),
        })
    }

    /// Returns the evaluator.
    #[must_use]
    pub const fn evaluator(&self) -> &LevelEvaluator {
        &self.evaluator
    }

    /// Returns the coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &DispatchCoordinator {
        &self.coordinator
    }

    /// Returns the channel registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ChannelRegistry> {
        self.coordinator.registry()
    }

    /// Adds an observer that receives every recorded event.
    pub fn add_observer(&self, observer: Arc<dyn AlertObserver>) {
        self.coordinator.add_observer(observer);
    }

    // ============ Sampling ============

    /// Feeds one reading through the evaluator and coordinator.
    ///
    /// `None` stands for a failed or unusable measurement and is a no-op.
    /// Returns immediately; channel work runs on spawned tasks, so this must
    /// be called from within a Tokio runtime.
    ///
    /// Observers are notified after the ordering lock is released, so they
    /// may call back into the manager.
    pub fn ingest(&self, reading: Option<f64>) -> Dispatch {
        let dispatch = {
            let _order = self.ingest.lock();
            let evaluation = self.evaluator.evaluate(reading);
            self.coordinator.dispatch_evaluation(&evaluation)
        };
        self.coordinator.notify_pending();
        dispatch
    }

    /// Synthesizes an alert at `level` through the normal dispatch path.
    ///
    /// The evaluator state is not modified.
    pub fn force_test_alert(&self, level: AlertLevel, reading: f64) -> Dispatch {
        let dispatch = {
            let _order = self.ingest.lock();
            self.coordinator.dispatch_test_alert(level, reading)
        };
        self.coordinator.notify_pending();
        dispatch
    }

    /// Waits until no burst or periodic send is running.
    pub async fn wait_idle(&self) {
        self.coordinator.wait_idle().await;
    }

    /// Probes every channel and records availability.
    pub async fn probe_channels(&self, timeout: Duration) -> BTreeMap<String, bool> {
        self.registry().probe_all(timeout).await
    }

    // ============ Status ============

    /// Returns the current alert level.
    #[must_use]
    pub fn current_level(&self) -> AlertLevel {
        self.evaluator.current_level()
    }

    /// Returns a snapshot of levels, channels and recent history.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        let _order = self.ingest.lock();
        let state = self.evaluator.state();
        let level = state.current_level;

        StatusSnapshot {
            level,
            level_name: level.as_str().to_string(),
            level_color: level.color().to_string(),
            last_dispatched_reading: state.last_dispatched_reading,
            thresholds: self.evaluator.thresholds(),
            hysteresis: self.evaluator.hysteresis(),
            significant_change: self.evaluator.significant_change(),
            bursting: self.coordinator.is_bursting(),
            channels: self.registry().status_snapshot(),
            history: self.coordinator.history(self.status_history),
            generated_at: Utc::now(),
        }
    }

    /// Returns up to `limit` of the most recent events, oldest first.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<AlertEvent> {
        self.coordinator.history(limit)
    }

    // ============ Operator Controls ============

    /// Replaces the threshold table.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidThresholds` if the table is invalid; the
    /// previous table stays in effect.
    pub fn set_thresholds(&self, thresholds: ThresholdTable) -> Result<()> {
        self.evaluator.set_thresholds(thresholds)?;
        info!(
            warning = thresholds.warning,
            danger = thresholds.danger,
            critical = thresholds.critical,
            "thresholds updated"
        );
        Ok(())
    }

    /// Replaces the hysteresis margin.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` for a negative or non-finite margin.
    pub fn set_hysteresis(&self, hysteresis: f64) -> Result<()> {
        self.evaluator.set_hysteresis(hysteresis)?;
        info!(hysteresis, "hysteresis updated");
        Ok(())
    }

    /// Changes the calibration range and with it the significant-change threshold.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` unless `range` is positive and finite.
    pub fn set_calibration_range(&self, range: f64) -> Result<()> {
        let mut calibration = self.calibration.lock();
        let updated = CalibrationConfig {
            range,
            ..*calibration
        };
        validate_calibration(&updated)?;
        self.evaluator
            .set_significant_change(updated.significant_change())?;
        *calibration = updated;

        info!(
            range,
            significant_change = updated.significant_change(),
            "calibration range updated"
        );
        Ok(())
    }

    /// Enables or disables a channel.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::UnknownChannel` if no such channel is registered.
    pub fn set_channel_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.registry().set_enabled(name, enabled)
    }

    /// Changes a channel's cooldown.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::UnknownChannel` if no such channel is registered.
    pub fn set_channel_cooldown(&self, name: &str, cooldown_secs: u64) -> Result<()> {
        self.registry().set_cooldown(name, cooldown_secs)
    }

    /// Enables or disables periodic re-alerts while a level is sustained.
    pub fn set_periodic_realert(&self, enabled: bool) {
        self.coordinator.set_periodic_realert(enabled);
        info!(enabled, "periodic re-alert toggled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::LogChannel;
    use crate::config::BurstConfig;
    use crate::error::AlertError;
    use crate::registry::ChannelSettings;
    use crate::types::AlertKind;

    fn config() -> AlertConfig {
        AlertConfig {
            burst: BurstConfig {
                attempts: 1,
                interval_ms: 0,
                send_timeout_ms: 1_000,
            },
            ..AlertConfig::default()
        }
    }

    fn manager() -> AlertManager {
        let registry = Arc::new(ChannelRegistry::new());
        registry
            .register(Arc::new(LogChannel::default()), ChannelSettings::default())
            .unwrap();
        AlertManager::new(&config(), registry).unwrap()
    }

    mod construction_tests {
        use super::*;

        #[test]
        fn invalid_config_is_rejected() {
            let mut config = config();
            config.thresholds.danger = 100.0;
            let result = AlertManager::new(&config, Arc::new(ChannelRegistry::new()));
            assert!(matches!(result, Err(AlertError::InvalidThresholds { .. })));
        }

        #[test]
        fn starts_normal() {
            let manager = manager();
            assert_eq!(manager.current_level(), AlertLevel::Normal);
            assert!(manager.history(10).is_empty());
        }
    }

    mod ingest_tests {
        use super::*;

        #[tokio::test]
        async fn hysteresis_sequence_records_events() {
            let manager = manager();
            let mut levels = Vec::new();
            for reading in [100.0, 160.0, 145.0, 130.0] {
                let dispatch = manager.ingest(Some(reading));
                levels.push(manager.current_level());
                dispatch.wait().await;
            }

            assert_eq!(
                levels,
                vec![
                    AlertLevel::Normal,
                    AlertLevel::Warning,
                    AlertLevel::Warning,
                    AlertLevel::Normal
                ]
            );

            let kinds: Vec<AlertKind> = manager.history(10).iter().map(|e| e.kind).collect();
            assert_eq!(
                kinds,
                vec![
                    AlertKind::Transition,
                    AlertKind::Significant,
                    AlertKind::Resolved
                ]
            );
        }

        #[tokio::test]
        async fn absent_reading_is_noop() {
            let manager = manager();
            manager.ingest(Some(270.0)).wait().await;
            let before = manager.status();

            assert!(matches!(manager.ingest(None), Dispatch::Idle));
            assert!(matches!(manager.ingest(Some(f64::NAN)), Dispatch::Idle));

            let after = manager.status();
            assert_eq!(after.level, before.level);
            assert_eq!(after.history.len(), before.history.len());
        }

        #[tokio::test]
        async fn test_alert_leaves_evaluator_untouched() {
            let manager = manager();
            let report = manager
                .force_test_alert(AlertLevel::Critical, 300.0)
                .wait()
                .await
                .unwrap();

            assert_eq!(report.delivered(), 1);
            assert_eq!(manager.current_level(), AlertLevel::Normal);
            assert!(manager.evaluator().state().last_dispatched_reading.abs() < f64::EPSILON);
            assert_eq!(manager.history(1)[0].kind, AlertKind::Test);
        }
    }

    mod status_tests {
        use super::*;

        #[tokio::test]
        async fn status_reports_level_and_channels() {
            let manager = manager();
            manager.ingest(Some(265.0)).wait().await;

            let status = manager.status();
            assert_eq!(status.level, AlertLevel::Danger);
            assert_eq!(status.level_name, "DANGER");
            assert_eq!(status.level_color, "#f97316");
            assert!((status.last_dispatched_reading - 265.0).abs() < f64::EPSILON);
            assert!(!status.bursting);
            assert_eq!(status.channels["log"].status.deliveries, 1);
            assert_eq!(status.available_channels(), 1);
            assert_eq!(status.history.len(), 1);
        }

        #[tokio::test]
        async fn status_history_is_bounded() {
            let manager = manager();
            for i in 0..30 {
                let reading = if i % 2 == 0 { 170.0 } else { 20.0 };
                manager.ingest(Some(reading)).wait().await;
            }
            assert_eq!(manager.status().history.len(), 10);
            assert_eq!(manager.history(100).len(), 30);
        }

        #[test]
        fn status_serializes() {
            let manager = manager();
            let json = serde_json::to_value(manager.status()).unwrap();
            assert_eq!(json["level"], "NORMAL");
            assert_eq!(json["level_color"], "#22c55e");
            assert_eq!(json["thresholds"]["critical"], 290.0);
        }
    }

    mod control_tests {
        use super::*;

        #[test]
        fn invalid_thresholds_keep_previous() {
            let manager = manager();
            let bad = ThresholdTable {
                warning: 200.0,
                danger: 150.0,
                critical: 290.0,
            };
            assert!(manager.set_thresholds(bad).is_err());
            assert_eq!(manager.status().thresholds, ThresholdTable::default());
        }

        #[test]
        fn calibration_range_rescales_significant_change() {
            let manager = manager();
            assert!((manager.status().significant_change - 10.0).abs() < f64::EPSILON);

            manager.set_calibration_range(400.0).unwrap();
            assert!((manager.status().significant_change - 20.0).abs() < f64::EPSILON);

            assert!(manager.set_calibration_range(-1.0).is_err());
            assert!((manager.status().significant_change - 20.0).abs() < f64::EPSILON);
        }

        #[test]
        fn hysteresis_validation() {
            let manager = manager();
            manager.set_hysteresis(5.0).unwrap();
            assert!(manager.set_hysteresis(-5.0).is_err());
            assert!((manager.status().hysteresis - 5.0).abs() < f64::EPSILON);
        }

        #[test]
        fn channel_controls() {
            let manager = manager();
            manager.set_channel_enabled("log", false).unwrap();
            manager.set_channel_cooldown("log", 30).unwrap();

            let status = manager.status();
            assert!(!status.channels["log"].settings.enabled);
            assert_eq!(status.channels["log"].settings.cooldown_secs, 30);

            assert!(matches!(
                manager.set_channel_enabled("pager", true),
                Err(AlertError::UnknownChannel { .. })
            ));
        }
    }
}
