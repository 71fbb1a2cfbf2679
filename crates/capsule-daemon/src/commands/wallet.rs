//! Data Wallet command handlers.

use std::sync::Arc;

use capsule_types::events::EventType;
use serde_json::Value;

use super::{day_param, opt_param, param, range_param, to_json};
use crate::day;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Totals for one day (default today).
pub async fn get_usage_summary(state: &Arc<DaemonState>, params: &Value) -> Result {
    let day = day_param(params)?;
    let summary = state.ledger.lock().await.summary(day)?;
    to_json(&summary)
}

/// Daily totals over a range, empty days included.
pub async fn get_usage_history(state: &Arc<DaemonState>, params: &Value) -> Result {
    let range = range_param(params)?;
    let history = state.ledger.lock().await.history(range)?;
    to_json(&history)
}

/// Per-unit usage for one day.
pub async fn get_usage_breakdown(state: &Arc<DaemonState>, params: &Value) -> Result {
    let day = day_param(params)?;
    let records = state.ledger.lock().await.breakdown(day)?;
    to_json(&records)
}

/// Record bytes used by a live session (or a unit, if `unit_id` is given).
pub async fn record_live_usage(state: &Arc<DaemonState>, params: &Value) -> Result {
    let day = day::current_day();
    let unit_id: Option<String> = opt_param(params, "unit_id")?;
    if unit_id.as_deref() == Some("") {
        return Err(RpcError::invalid_params("unit_id must not be empty"));
    }
    let actual_bytes: u64 = param(params, "actual_bytes")?;
    let expected_bytes: u64 = opt_param(params, "expected_bytes")?.unwrap_or(0);

    state
        .ledger
        .lock()
        .await
        .record(day, unit_id.as_deref(), expected_bytes, actual_bytes)?;

    state.event_bus.publish(
        EventType::UsageRecorded,
        serde_json::json!({
            "day": day,
            "unit_id": unit_id,
            "actual_bytes": actual_bytes,
        }),
    );
    Ok(serde_json::json!({ "day": day }))
}

/// Snapshot report over a range (default the last 7 days).
pub async fn get_wallet_report(state: &Arc<DaemonState>, params: &Value) -> Result {
    let range = range_param(params)?;
    let report = state.ledger.lock().await.report(range, day::now_secs())?;
    to_json(&report)
}
