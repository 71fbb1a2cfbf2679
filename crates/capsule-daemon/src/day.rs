//! Day boundary processing.
//!
//! Data Wallet days are UTC days. At each boundary every earlier day is
//! closed so its totals can no longer change.

use std::sync::Arc;

use capsule_types::events::EventType;
use capsule_types::usage::Day;
use capsule_types::DAY_SECS;
use tracing::info;

use crate::DaemonState;

/// Current Unix time in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn current_day() -> Day {
    Day::from_timestamp(now_secs())
}

/// Seconds until the next day boundary.
pub fn seconds_until_next_day(now: u64) -> u64 {
    DAY_SECS - (now % DAY_SECS)
}

/// Close every day before `today`.
pub async fn run_day_boundary(state: &Arc<DaemonState>, today: Day) -> anyhow::Result<()> {
    let closed = state.ledger.lock().await.close_days_before(today)?;
    if closed {
        info!(day = today.0, "day boundary: earlier wallet days closed");
        state.event_bus.publish(
            EventType::DayClosed,
            serde_json::json!({ "open_from_day": today }),
        );
    }
    Ok(())
}
