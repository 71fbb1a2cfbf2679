//! Event bus.
//!
//! Events are pushed from the daemon to UI subscribers as JSON-RPC
//! notifications. Each subscriber has an independent buffer; a slow
//! subscriber skips the events it lagged behind on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use capsule_types::events::{Event, EventType};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::day;

/// Filter for event subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category filter: "download", "storage", "wallet", "system".
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    /// Only events about these content units.
    #[serde(default)]
    pub unit_ids: Option<Vec<String>>,
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Emit an event stamped with the current time.
    pub fn publish(&self, event_type: EventType, payload: serde_json::Value) {
        self.emit(Event {
            event_type,
            timestamp: day::now_secs(),
            payload,
        });
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref categories) = self.categories {
            let category = event.event_type.category();
            if !categories.iter().any(|c| c == category) {
                return false;
            }
        }

        // Events without a unit id pass the unit filter.
        if let Some(ref unit_ids) = self.unit_ids {
            if let Some(id) = event.payload.get("unit_id").and_then(|v| v.as_str()) {
                if !unit_ids.iter().any(|u| u == id) {
                    return false;
                }
            }
        }

        true
    }
}
