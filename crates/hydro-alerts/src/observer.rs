//! Observer sinks for alert events.
//!
//! Every [`AlertEvent`], including resolutions, is handed to each registered
//! [`AlertObserver`]. Observers are best-effort: they cannot report failure
//! back to the coordinator, so a broken dashboard never affects dispatch.

use std::fmt;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::types::{AlertEvent, AlertLevel};

/// Trait for observers of alert events (dashboards, push sinks, audit).
///
/// `notify` runs on the thread that recorded the event, after channel
/// dispatch has started and with no manager lock held, so an observer may
/// read [`AlertManager::status`](crate::AlertManager::status). A panic is
/// caught and logged.
pub trait AlertObserver: Send + Sync + fmt::Debug {
    /// Receives an event.
    fn notify(&self, event: &AlertEvent);
}

/// Observer that writes events to `tracing`.
///
/// Events are logged at a level matching their severity:
/// - NORMAL → `tracing::info!`
/// - WARNING → `tracing::warn!`
/// - DANGER, CRITICAL → `tracing::error!`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AlertObserver for TracingObserver {
    fn notify(&self, event: &AlertEvent) {
        let id = event.short_id();
        let kind = event.kind;
        match event.new_level {
            AlertLevel::Normal => {
                info!(target: "hydro_alerts::events", %id, %kind, reading = event.reading, "{}", event.message);
            }
            AlertLevel::Warning => {
                warn!(target: "hydro_alerts::events", %id, %kind, reading = event.reading, "{}", event.message);
            }
            AlertLevel::Danger | AlertLevel::Critical => {
                error!(target: "hydro_alerts::events", %id, %kind, reading = event.reading, "{}", event.message);
            }
        }
    }
}

/// Observer that publishes events on a broadcast channel.
///
/// Dashboards call [`BroadcastObserver::subscribe`]; a slow subscriber only
/// loses its own oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<AlertEvent>,
}

impl BroadcastObserver {
    /// Creates a broadcast observer buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl AlertObserver for BroadcastObserver {
    fn notify(&self, event: &AlertEvent) {
        if self.sender.send(event.clone()).is_err() {
            debug!(id = %event.short_id(), "no dashboard subscribers for alert event");
        }
    }
}
