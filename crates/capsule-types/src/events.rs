//! Event types for daemon-to-UI notification.
//!
//! All events are emitted via the JSON-RPC event subscription channel.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Envelope for all daemon events.
#[derive(Clone, Debug, Serialize, Deserialize, TS)]
pub struct Event {
    pub event_type: EventType,
    #[ts(type = "number")]
    pub timestamp: u64,
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,
}

/// All event types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Download events
    DownloadQueued,
    DownloadStarted,
    DownloadCompleted,
    DownloadRetryScheduled,
    DownloadFailed,

    // Storage events
    ContentDiscovered,
    ContentRemoved,
    ContentEvicted,
    QuotaExceeded,

    // Data Wallet events
    UsageRecorded,
    DayClosed,

    // System events
    DaemonStarted,
    NetworkChanged,
    AppStateChanged,
}

impl EventType {
    /// Coarse grouping used by subscription filters.
    pub fn category(&self) -> &'static str {
        match self {
            EventType::DownloadQueued
            | EventType::DownloadStarted
            | EventType::DownloadCompleted
            | EventType::DownloadRetryScheduled
            | EventType::DownloadFailed => "download",
            EventType::ContentDiscovered
            | EventType::ContentRemoved
            | EventType::ContentEvicted
            | EventType::QuotaExceeded => "storage",
            EventType::UsageRecorded | EventType::DayClosed => "wallet",
            EventType::DaemonStarted | EventType::NetworkChanged | EventType::AppStateChanged => {
                "system"
            }
        }
    }
}
