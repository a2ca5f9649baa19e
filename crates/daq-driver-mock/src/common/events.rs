//! Timestamped record of what the mocks were told to do.
//!
//! Several mocks can share one log so tests can assert the relative order
//! and spacing of actions across devices. Timestamps come from
//! `tokio::time`, so they are exact under a paused test clock.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;

/// One recorded action.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub at: Instant,
    pub device: String,
    pub action: String,
}

/// Shared, append-only event log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, device: &str, action: impl Into<String>) {
        self.events.lock().push(Event {
            at: Instant::now(),
            device: device.to_string(),
            action: action.into(),
        });
    }

    /// Snapshot of every event so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Actions recorded for one device, in order.
    pub fn actions(&self, device: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.device == device)
            .map(|e| e.action.clone())
            .collect()
    }

    /// Timestamps of every occurrence of `action` on `device`.
    pub fn times(&self, device: &str, action: &str) -> Vec<Instant> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.device == device && e.action == action)
            .map(|e| e.at)
            .collect()
    }

    pub fn first(&self, device: &str, action: &str) -> Option<Instant> {
        self.times(device, action).into_iter().next()
    }

    pub fn count(&self, device: &str, action: &str) -> usize {
        self.times(device, action).len()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
