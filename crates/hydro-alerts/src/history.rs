//! Bounded alert history.

use std::collections::VecDeque;

use crate::types::AlertEvent;

/// Default number of events retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Append-only, capacity-bounded log of [`AlertEvent`]s.
///
/// Once full, each append silently evicts the oldest event. Snapshots are
/// returned oldest first.
#[derive(Debug, Clone)]
pub struct AlertHistory {
    events: VecDeque<AlertEvent>,
    capacity: usize,
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl AlertHistory {
    /// Creates an empty history holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an event, evicting the oldest when over capacity.
    pub fn append(&mut self, event: AlertEvent) {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Returns up to `limit` of the most recent events, oldest first.
    #[must_use]
    pub fn snapshot(&self, limit: usize) -> Vec<AlertEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    /// Returns the most recent event.
    #[must_use]
    pub fn latest(&self) -> Option<&AlertEvent> {
        self.events.back()
    }

    /// Returns the number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no events are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
