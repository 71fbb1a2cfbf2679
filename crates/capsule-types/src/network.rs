//! Connectivity as seen by the download scheduler.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Transfer-level network failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, TS, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum NetworkError {
    /// No route to the content source.
    #[error("network unavailable")]
    Unavailable,
    /// The transfer did not finish within the configured deadline.
    #[error("transfer timed out")]
    Timeout,
}

/// Current uplink reported by the host platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum NetworkLink {
    #[default]
    Offline,
    /// Mobile data or another link billed per byte.
    Metered,
    /// Wi-Fi or wired.
    Unmetered,
}

impl NetworkLink {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkLink::Offline => "offline",
            NetworkLink::Metered => "metered",
            NetworkLink::Unmetered => "unmetered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "offline" => Some(NetworkLink::Offline),
            "metered" => Some(NetworkLink::Metered),
            "unmetered" => Some(NetworkLink::Unmetered),
            _ => None,
        }
    }

    pub fn is_online(&self) -> bool {
        !matches!(self, NetworkLink::Offline)
    }
}
