//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category.

pub mod app;
pub mod content;
pub mod downloads;
pub mod wallet;

use capsule_types::usage::{Day, DayRange};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::day;
use crate::rpc::RpcError;

/// Required string parameter.
pub(crate) fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, RpcError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

/// Optional parameter deserialized into `T`.
pub(crate) fn opt_param<T: DeserializeOwned>(params: &Value, key: &str) -> Result<Option<T>, RpcError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| RpcError::invalid_params(&format!("{key}: {e}"))),
    }
}

/// Required parameter deserialized into `T`.
pub(crate) fn param<T: DeserializeOwned>(params: &Value, key: &str) -> Result<T, RpcError> {
    opt_param(params, key)?.ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

/// `day` parameter, defaulting to today.
pub(crate) fn day_param(params: &Value) -> Result<Day, RpcError> {
    Ok(opt_param(params, "day")?.unwrap_or_else(day::current_day))
}

/// Day range from `start_day`/`end_day`, or the `days` days ending today
/// (default 7).
/// Longest range a history or report query may span.
const MAX_RANGE_DAYS: u32 = 366;

pub(crate) fn range_param(params: &Value) -> Result<DayRange, RpcError> {
    let start: Option<Day> = opt_param(params, "start_day")?;
    let end: Option<Day> = opt_param(params, "end_day")?;
    match (start, end) {
        (Some(start), Some(end)) if start > end => {
            Err(RpcError::invalid_params("start_day after end_day"))
        }
        (Some(start), Some(end)) if end.0 - start.0 >= MAX_RANGE_DAYS => {
            Err(RpcError::invalid_params("range longer than 366 days"))
        }
        (Some(start), Some(end)) => Ok(DayRange::new(start, end)),
        (None, None) => {
            let days: u32 = opt_param(params, "days")?.unwrap_or(7);
            if days == 0 || days > MAX_RANGE_DAYS {
                return Err(RpcError::invalid_params("days must be 1..=366"));
            }
            Ok(DayRange::ending_at(day::current_day(), days))
        }
        _ => Err(RpcError::invalid_params("start_day and end_day go together")),
    }
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&e.to_string()))
}
