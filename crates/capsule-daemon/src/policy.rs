//! Download network policy: Wi-Fi only and the night window.
//!
//! The scheduler only sees a boolean; this is where it comes from.

use capsule_types::network::NetworkLink;
use chrono::Timelike;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkPolicy {
    pub wifi_only: bool,
    pub night_only: bool,
    pub night_start_hour: u32,
    pub night_end_hour: u32,
}

impl NetworkPolicy {
    /// Whether downloads may run over `link` at `local_hour` (0-23).
    pub fn allows(&self, link: NetworkLink, local_hour: u32) -> bool {
        match link {
            NetworkLink::Offline => false,
            NetworkLink::Metered if self.wifi_only => false,
            NetworkLink::Metered | NetworkLink::Unmetered => {
                !self.night_only || self.in_night_window(local_hour)
            }
        }
    }

    /// Evaluate against the local wall clock.
    pub fn allows_now(&self, link: NetworkLink) -> bool {
        self.allows(link, chrono::Local::now().hour())
    }

    /// Start inclusive, end exclusive. A window may wrap past midnight; an
    /// empty window (start == end) covers the whole day.
    pub fn in_night_window(&self, hour: u32) -> bool {
        let start = self.night_start_hour % 24;
        let end = self.night_end_hour % 24;
        if start == end {
            true
        } else if start < end {
            (start..end).contains(&hour)
        } else {
            hour >= start || hour < end
        }
    }
}
