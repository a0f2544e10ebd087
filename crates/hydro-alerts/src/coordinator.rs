//! Dispatch coordination.
//!
//! The [`DispatchCoordinator`] turns evaluator output into alert events and
//! fans them out to every enabled channel. Each qualifying trigger records an
//! [`AlertEvent`] in the history, hands it to the observers, and starts a
//! *burst*: a fixed number of repetitions, each invoking every enabled
//! channel concurrently. At most one burst runs at a time; a trigger that
//! arrives mid-burst is recorded but its burst is dropped.
//!
//! Each repetition waits for all of its per-channel tasks before sleeping
//! for the configured interval, so the number of attempts per channel is
//! deterministic.
//!
//! Observers are notified after the dispatch decision is made and outside
//! every coordinator lock, in the order events were recorded. An observer
//! may call back into the coordinator or the manager.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channels::{ChannelOutcome, DeliveryReport};
use crate::config::{AlertConfig, BurstConfig};
use crate::evaluator::Evaluation;
use crate::history::AlertHistory;
use crate::observer::AlertObserver;
use crate::registry::{Channel, ChannelRegistry};
use crate::types::{AlertEvent, AlertKind, AlertLevel, AlertMessage};

/// Why a triggered alert did not start a burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Another burst was still running.
    BurstActive,
    /// No enabled channel accepts this kind of alert.
    NoChannels,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BurstActive => write!(f, "burst already active"),
            Self::NoChannels => write!(f, "no enabled channels"),
        }
    }
}

/// What the coordinator did with one evaluator result or test trigger.
#[derive(Debug)]
pub enum Dispatch {
    /// Nothing to do.
    Idle,
    /// The level returned to NORMAL; the event was recorded, no channels were invoked.
    Resolved(AlertEvent),
    /// A burst was started.
    Burst {
        /// The recorded event.
        event: AlertEvent,
        /// Handle of the burst job.
        handle: JoinHandle<BurstReport>,
    },
    /// The event was recorded but no burst was started.
    Dropped {
        /// The recorded event.
        event: AlertEvent,
        /// Why the burst was not started.
        reason: DropReason,
    },
    /// Periodic re-alert sends were started on these channels.
    Periodic {
        /// Channels that were sent to.
        channels: Vec<String>,
    },
}

impl Dispatch {
    /// Returns the recorded event, if any.
    #[must_use]
    pub const fn event(&self) -> Option<&AlertEvent> {
        match self {
            Self::Resolved(event) | Self::Burst { event, .. } | Self::Dropped { event, .. } => {
                Some(event)
            }
            Self::Idle | Self::Periodic { .. } => None,
        }
    }

    /// Returns true if a burst was started.
    #[must_use]
    pub const fn is_burst(&self) -> bool {
        matches!(self, Self::Burst { .. })
    }

    /// Waits for the burst to finish and returns its report.
    ///
    /// Returns `None` when no burst was started or the burst job failed.
    pub async fn wait(self) -> Option<BurstReport> {
        match self {
            Self::Burst { handle, .. } => match handle.await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(error = %e, "burst job failed");
                    None
                }
            },
            _ => None,
        }
    }
}

/// Deliveries of one burst repetition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptReport {
    /// Repetition number, starting at 1.
    pub attempt: u32,
    /// One report per invoked channel.
    pub deliveries: Vec<DeliveryReport>,
}

/// Aggregated result of a burst.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurstReport {
    /// The event the burst announced.
    pub event_id: String,
    /// Every repetition, in order.
    pub attempts: Vec<AttemptReport>,
}

impl BurstReport {
    /// Returns the number of successful deliveries across all repetitions.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.deliveries().filter(|d| d.outcome.is_delivered()).count()
    }

    /// Returns the number of failed deliveries across all repetitions.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.deliveries().filter(|d| !d.outcome.is_delivered()).count()
    }

    /// Returns every delivery for one channel.
    pub fn deliveries_for<'a>(&'a self, channel: &'a str) -> impl Iterator<Item = &'a DeliveryReport> {
        self.deliveries().filter(move |d| d.channel == channel)
    }

    fn deliveries(&self) -> impl Iterator<Item = &DeliveryReport> {
        self.attempts.iter().flat_map(|a| a.deliveries.iter())
    }
}

/// Holds the single-active-burst flag; releases it when dropped, including
/// during unwinding.
#[derive(Debug)]
struct BurstGuard {
    flag: Arc<watch::Sender<bool>>,
}

impl BurstGuard {
    fn acquire(flag: &Arc<watch::Sender<bool>>) -> Option<Self> {
        let acquired = flag.send_if_modified(|active| {
            if *active {
                false
            } else {
                *active = true;
                true
            }
        });
        acquired.then(|| Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for BurstGuard {
    fn drop(&mut self) {
        self.flag.send_replace(false);
    }
}

#[derive(Debug)]
struct BurstJob {
    message: Arc<AlertMessage>,
    registry: Arc<ChannelRegistry>,
    config: BurstConfig,
}

impl BurstJob {
    async fn run(self, _guard: BurstGuard) -> BurstReport {
        let mut report = BurstReport {
            event_id: self.message.event_id.clone(),
            attempts: Vec::with_capacity(self.config.attempts as usize),
        };

        for attempt in 1..=self.config.attempts {
            let channels = self.registry.channels_for(self.message.kind);
            let handles: Vec<_> = channels
                .into_iter()
                .map(|channel| {
                    let task = deliver(
                        Arc::clone(&channel),
                        Arc::clone(&self.message),
                        self.config.send_timeout(),
                    );
                    (channel, tokio::spawn(task))
                })
                .collect();

            let mut deliveries = Vec::with_capacity(handles.len());
            for (channel, handle) in handles {
                match handle.await {
                    Ok(delivery) => deliveries.push(delivery),
                    Err(e) => {
                        let outcome = ChannelOutcome::failure(format!("delivery task failed: {e}"));
                        channel.record_outcome(&outcome);
                        warn!(channel = %channel.name(), error = %e, "delivery task failed");
                        deliveries.push(DeliveryReport {
                            channel: channel.name().to_string(),
                            outcome,
                            elapsed: Duration::ZERO,
                        });
                    }
                }
            }

            debug!(
                id = %self.message.short_id(),
                attempt,
                channels = deliveries.len(),
                delivered = deliveries.iter().filter(|d| d.outcome.is_delivered()).count(),
                "burst attempt complete"
            );
            report.attempts.push(AttemptReport {
                attempt,
                deliveries,
            });

            if attempt < self.config.attempts && !self.config.interval().is_zero() {
                tokio::time::sleep(self.config.interval()).await;
            }
        }

        info!(
            id = %self.message.short_id(),
            level = %self.message.level,
            attempts = report.attempts.len(),
            delivered = report.delivered(),
            failed = report.failed(),
            "alert burst complete"
        );
        report
    }
}

/// Sends one message to one channel and records the outcome in its status.
async fn deliver(channel: Arc<Channel>, message: Arc<AlertMessage>, timeout: Duration) -> DeliveryReport {
    channel.record_attempt(message.level);
    let started = Instant::now();

    let outcome = match tokio::time::timeout(timeout, channel.adapter().send(&message)).await {
        Ok(outcome) => outcome,
        Err(_) => ChannelOutcome::failure(format!("timed out after {}ms", timeout.as_millis())),
    };
    channel.record_outcome(&outcome);

    match &outcome {
        ChannelOutcome::Delivered => {
            debug!(channel = %channel.name(), id = %message.short_id(), kind = %message.kind, "alert delivered");
        }
        ChannelOutcome::Failed(reason) => {
            warn!(channel = %channel.name(), id = %message.short_id(), error = %reason, "alert delivery failed");
        }
    }

    DeliveryReport {
        channel: channel.name().to_string(),
        outcome,
        elapsed: started.elapsed(),
    }
}

/// Reacts to evaluator results and fans alerts out to channels.
#[derive(Debug)]
pub struct DispatchCoordinator {
    registry: Arc<ChannelRegistry>,
    history: Mutex<AlertHistory>,
    observers: RwLock<Vec<Arc<dyn AlertObserver>>>,
    burst: BurstConfig,
    periodic_realert: AtomicBool,
    bursting: Arc<watch::Sender<bool>>,
    trigger: Mutex<AlertLevel>,
    /// Recorded events not yet handed to observers, in record order.
    pending: Mutex<VecDeque<AlertEvent>>,
    notifying: Mutex<()>,
    periodic_sends: Mutex<Vec<JoinHandle<DeliveryReport>>>,
}

impl DispatchCoordinator {
    /// Creates a coordinator dispatching to `registry`.
    #[must_use]
    pub fn new(registry: Arc<ChannelRegistry>, config: &AlertConfig) -> Self {
        let (bursting, _) = watch::channel(false);
        Self {
            registry,
            history: Mutex::new(AlertHistory::with_capacity(config.history_capacity)),
            observers: RwLock::new(Vec::new()),
            burst: config.burst,
            periodic_realert: AtomicBool::new(config.periodic_realert),
            bursting: Arc::new(bursting),
            trigger: Mutex::new(AlertLevel::Normal),
            pending: Mutex::new(VecDeque::new()),
            notifying: Mutex::new(()),
            periodic_sends: Mutex::new(Vec::new()),
        }
    }

    /// Returns the channel registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Returns the burst configuration.
    #[must_use]
    pub const fn burst_config(&self) -> BurstConfig {
        self.burst
    }

    /// Adds an observer that receives every recorded event.
    pub fn add_observer(&self, observer: Arc<dyn AlertObserver>) {
        self.observers.write().push(observer);
    }

    /// Returns the number of observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Enables or disables the periodic re-alert path.
    pub fn set_periodic_realert(&self, enabled: bool) {
        self.periodic_realert.store(enabled, Ordering::Relaxed);
    }

    /// Returns true if the periodic re-alert path is enabled.
    #[must_use]
    pub fn periodic_realert(&self) -> bool {
        self.periodic_realert.load(Ordering::Relaxed)
    }

    /// Returns true while a burst is running.
    #[must_use]
    pub fn is_bursting(&self) -> bool {
        *self.bursting.borrow()
    }

    /// Waits until no burst is running and every periodic send has finished.
    pub async fn wait_idle(&self) {
        loop {
            let mut rx = self.bursting.subscribe();
            let _ = rx.wait_for(|active| !*active).await;

            let sends = std::mem::take(&mut *self.periodic_sends.lock());
            if sends.is_empty() {
                return;
            }
            for send in sends {
                if let Err(e) = send.await {
                    warn!(error = %e, "periodic delivery task failed");
                }
            }
        }
    }

    /// Returns the number of periodic sends still tracked.
    #[must_use]
    pub fn pending_periodic_sends(&self) -> usize {
        let mut sends = self.periodic_sends.lock();
        sends.retain(|send| !send.is_finished());
        sends.len()
    }

    /// Returns up to `limit` of the most recent events, oldest first.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<AlertEvent> {
        self.history.lock().snapshot(limit)
    }

    /// Returns the number of recorded events.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Handles one evaluator result and notifies observers.
    ///
    /// Never blocks on I/O: channel work runs on spawned tasks. Must be
    /// called from within a Tokio runtime.
    pub fn on_evaluation(&self, evaluation: &Evaluation) -> Dispatch {
        let dispatch = self.dispatch_evaluation(evaluation);
        self.notify_pending();
        dispatch
    }

    /// Records and dispatches an evaluator result; observers are notified
    /// later by [`Self::notify_pending`].
    pub(crate) fn dispatch_evaluation(&self, evaluation: &Evaluation) -> Dispatch {
        let Some(reading) = evaluation.reading else {
            return Dispatch::Idle;
        };

        if !evaluation.is_triggered() {
            if evaluation.level.is_alerting() && self.periodic_realert() {
                return self.periodic(evaluation.level, reading);
            }
            return Dispatch::Idle;
        }

        let kind = if !evaluation.level.is_alerting() {
            AlertKind::Resolved
        } else if evaluation.transitioned {
            AlertKind::Transition
        } else {
            AlertKind::Significant
        };

        let event = AlertEvent::new(
            kind,
            evaluation.previous_level,
            evaluation.level,
            reading,
            evaluation.baseline,
        );
        let mut last_level = self.trigger.lock();
        self.trigger(&mut last_level, event)
    }

    /// Synthesizes an alert at `level` without consulting the evaluator.
    ///
    /// Uses the same path as a real transition, so channel wiring can be
    /// verified end to end. Escalation bookkeeping is left untouched.
    pub fn force_test_alert(&self, level: AlertLevel, reading: f64) -> Dispatch {
        let dispatch = self.dispatch_test_alert(level, reading);
        self.notify_pending();
        dispatch
    }

    pub(crate) fn dispatch_test_alert(&self, level: AlertLevel, reading: f64) -> Dispatch {
        info!(level = %level, reading, "test alert requested");
        let mut last_level = self.trigger.lock();
        let event = AlertEvent::new(AlertKind::Test, *last_level, level, reading, 0.0);
        self.trigger(&mut last_level, event)
    }

    /// Records `event` and starts its burst. `last_level` is the held
    /// trigger lock, so the record order matches the level chain.
    fn trigger(&self, last_level: &mut AlertLevel, event: AlertEvent) -> Dispatch {
        self.history.lock().append(event.clone());
        self.pending.lock().push_back(event.clone());

        if !event.new_level.is_alerting() {
            if event.kind == AlertKind::Resolved {
                *last_level = AlertLevel::Normal;
                self.registry.clear_escalation();
                info!(id = %event.short_id(), reading = event.reading, "alert resolved");
            }
            return Dispatch::Resolved(event);
        }

        if event.kind != AlertKind::Test {
            *last_level = event.new_level;
        }

        if self.registry.channels_for(event.kind).is_empty() {
            warn!(id = %event.short_id(), level = %event.new_level, "no enabled channels; alert recorded only");
            return Dispatch::Dropped {
                event,
                reason: DropReason::NoChannels,
            };
        }

        let Some(guard) = BurstGuard::acquire(&self.bursting) else {
            warn!(
                id = %event.short_id(),
                level = %event.new_level,
                kind = %event.kind,
                "burst already active; dropping trigger"
            );
            return Dispatch::Dropped {
                event,
                reason: DropReason::BurstActive,
            };
        };

        info!(
            id = %event.short_id(),
            level = %event.new_level,
            kind = %event.kind,
            reading = event.reading,
            attempts = self.burst.attempts,
            "starting alert burst"
        );

        let job = BurstJob {
            message: Arc::new(AlertMessage::from_event(&event)),
            registry: Arc::clone(&self.registry),
            config: self.burst,
        };
        let handle = tokio::spawn(job.run(guard));

        Dispatch::Burst { event, handle }
    }

    fn periodic(&self, level: AlertLevel, reading: f64) -> Dispatch {
        if self.is_bursting() {
            return Dispatch::Idle;
        }

        let now = Instant::now();
        let channels: Vec<Arc<Channel>> = self
            .registry
            .channels_for(AlertKind::Periodic)
            .into_iter()
            .filter(|c| c.try_reserve_cooldown(now))
            .collect();

        if channels.is_empty() {
            return Dispatch::Idle;
        }

        let message = Arc::new(AlertMessage::periodic(level, reading));
        let names = channels.iter().map(|c| c.name().to_string()).collect();
        let mut sends = self.periodic_sends.lock();
        sends.retain(|send| !send.is_finished());
        for channel in channels {
            sends.push(tokio::spawn(deliver(
                channel,
                Arc::clone(&message),
                self.burst.send_timeout(),
            )));
        }
        drop(sends);

        debug!(level = %level, reading, channels = ?names, "periodic re-alert sent");
        Dispatch::Periodic { channels: names }
    }

    /// Hands every recorded but unannounced event to the observers.
    ///
    /// Only one caller drains at a time; a caller that finds the drain busy
    /// leaves its events to the active drainer. A panicking observer is
    /// logged and skipped.
    pub(crate) fn notify_pending(&self) {
        loop {
            let Some(drain) = self.notifying.try_lock() else {
                return;
            };
            loop {
                let Some(event) = self.pending.lock().pop_front() else {
                    break;
                };
                let observers = self.observers.read().clone();
                for observer in observers {
                    let notified = catch_unwind(AssertUnwindSafe(|| observer.notify(&event)));
                    if notified.is_err() {
                        warn!(id = %event.short_id(), observer = ?observer, "observer panicked");
                    }
                }
            }
            drop(drain);

            if self.pending.lock().is_empty() {
                return;
            }
        }
    }
}
