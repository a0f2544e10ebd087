//! Level evaluation with hysteresis.
//!
//! The [`LevelEvaluator`] maps each reading to an [`AlertLevel`] and reports
//! whether the level transitioned or the reading moved far enough from the
//! last dispatched reading to warrant a same-level re-dispatch. All state is
//! read and written inside one critical section so a sampling call racing
//! with an operator call can never interleave.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::{AlertConfig, validate_hysteresis};
use crate::error::{AlertError, Result};
use crate::types::{AlertLevel, ThresholdTable};

/// The mutable state owned by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EvaluatorState {
    /// The level after the most recent evaluation.
    pub current_level: AlertLevel,
    /// Reading of the last dispatch; 0 whenever the level is NORMAL.
    pub last_dispatched_reading: f64,
}

/// The outcome of evaluating one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Level after this evaluation.
    pub level: AlertLevel,
    /// Level before this evaluation.
    pub previous_level: AlertLevel,
    /// The evaluated reading, `None` for an absent or unusable reading.
    pub reading: Option<f64>,
    /// Last dispatched reading before this evaluation.
    pub baseline: f64,
    /// The level changed.
    pub transitioned: bool,
    /// The reading moved at least the significant-change threshold away from `baseline`.
    pub significant: bool,
}

impl Evaluation {
    /// Returns true if either trigger condition holds.
    #[must_use]
    pub const fn is_triggered(&self) -> bool {
        self.transitioned || self.significant
    }

    const fn unchanged(state: EvaluatorState, reading: Option<f64>) -> Self {
        Self {
            level: state.current_level,
            previous_level: state.current_level,
            reading,
            baseline: state.last_dispatched_reading,
            transitioned: false,
            significant: false,
        }
    }
}

#[derive(Debug)]
struct Inner {
    thresholds: ThresholdTable,
    hysteresis: f64,
    significant_change: f64,
    state: EvaluatorState,
}

/// Hysteresis-based alert level state machine.
#[derive(Debug)]
pub struct LevelEvaluator {
    inner: Mutex<Inner>,
}

impl LevelEvaluator {
    /// Creates an evaluator starting at NORMAL.
    ///
    /// # Errors
    ///
    /// Returns an error if the thresholds, hysteresis or significant-change
    /// threshold are invalid.
    pub fn new(thresholds: ThresholdTable, hysteresis: f64, significant_change: f64) -> Result<Self> {
        thresholds.validate()?;
        validate_hysteresis(hysteresis)?;
        validate_significant_change(significant_change)?;

        Ok(Self {
            inner: Mutex::new(Inner {
                thresholds,
                hysteresis,
                significant_change,
                state: EvaluatorState::default(),
            }),
        })
    }

    /// Creates an evaluator from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the relevant configuration values are invalid.
    pub fn from_config(config: &AlertConfig) -> Result<Self> {
        Self::new(
            config.thresholds,
            config.hysteresis,
            config.significant_change(),
        )
    }

    /// Evaluates one reading.
    ///
    /// An absent or non-finite reading is a no-op that reports the unchanged
    /// current level.
    pub fn evaluate(&self, reading: Option<f64>) -> Evaluation {
        let mut inner = self.inner.lock();
        let state = inner.state;

        let Some(reading) = reading.filter(|r| r.is_finite()) else {
            return Evaluation::unchanged(state, None);
        };

        let current = state.current_level;
        let mut candidate = inner.thresholds.classify(reading);

        if candidate < current {
            let floor = inner
                .thresholds
                .threshold(current)
                .map_or(f64::NEG_INFINITY, |t| t - inner.hysteresis);
            if reading > floor {
                candidate = current;
            }
        }

        let transitioned = candidate != current;
        let significant = candidate.is_alerting()
            && (reading - state.last_dispatched_reading).abs() >= inner.significant_change;

        if transitioned || significant {
            inner.state.current_level = candidate;
            inner.state.last_dispatched_reading = if candidate.is_alerting() {
                reading
            } else {
                0.0
            };

            debug!(
                reading,
                from = %current,
                to = %candidate,
                transitioned,
                significant,
                "evaluator state updated"
            );
        }

        Evaluation {
            level: candidate,
            previous_level: current,
            reading: Some(reading),
            baseline: state.last_dispatched_reading,
            transitioned,
            significant,
        }
    }

    /// Returns the current level.
    #[must_use]
    pub fn current_level(&self) -> AlertLevel {
        self.inner.lock().state.current_level
    }

    /// Returns the reading of the last dispatch, 0 while NORMAL.
    #[must_use]
    pub fn last_dispatched_reading(&self) -> f64 {
        self.inner.lock().state.last_dispatched_reading
    }

    /// Returns a copy of the evaluator state.
    #[must_use]
    pub fn state(&self) -> EvaluatorState {
        self.inner.lock().state
    }

    /// Returns the active threshold table.
    #[must_use]
    pub fn thresholds(&self) -> ThresholdTable {
        self.inner.lock().thresholds
    }

    /// Returns the hysteresis margin.
    #[must_use]
    pub fn hysteresis(&self) -> f64 {
        self.inner.lock().hysteresis
    }

    /// Returns the significant-change threshold.
    #[must_use]
    pub fn significant_change(&self) -> f64 {
        self.inner.lock().significant_change
    }

    /// Replaces the threshold table.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidThresholds` if the table is invalid; the
    /// previous table stays in effect.
    pub fn set_thresholds(&self, thresholds: ThresholdTable) -> Result<()> {
        thresholds.validate()?;
        self.inner.lock().thresholds = thresholds;
        Ok(())
    }

    /// Replaces the hysteresis margin.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` for a negative or non-finite margin.
    pub fn set_hysteresis(&self, hysteresis: f64) -> Result<()> {
        validate_hysteresis(hysteresis)?;
        self.inner.lock().hysteresis = hysteresis;
        Ok(())
    }

    /// Replaces the significant-change threshold.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` unless the value is positive and finite.
    pub fn set_significant_change(&self, significant_change: f64) -> Result<()> {
        validate_significant_change(significant_change)?;
        self.inner.lock().significant_change = significant_change;
        Ok(())
    }
}

fn validate_significant_change(value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(AlertError::config(format!(
            "significant change threshold must be positive, got {value}"
        )));
    }
    Ok(())
}
