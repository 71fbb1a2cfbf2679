//! Data Wallet structures: per-day expected vs. actual transfer volume.

use std::fmt;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{UnitId, DAY_SECS};

/// Day key: whole days since the Unix epoch (UTC).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(transparent)]
pub struct Day(pub u32);

impl Day {
    /// Day containing the given Unix timestamp.
    pub fn from_timestamp(ts: u64) -> Self {
        Day(u32::try_from(ts / DAY_SECS).unwrap_or(u32::MAX))
    }

    /// First second of this day.
    pub fn start_timestamp(&self) -> u64 {
        u64::from(self.0) * DAY_SECS
    }

    pub fn next(&self) -> Self {
        Day(self.0.saturating_add(1))
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "day {}", self.0)
    }
}

/// Inclusive range of days.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct DayRange {
    pub start: Day,
    pub end: Day,
}

impl DayRange {
    pub fn new(start: Day, end: Day) -> Self {
        Self { start, end }
    }

    /// The `days` days ending with `last`, e.g. a week view.
    pub fn ending_at(last: Day, days: u32) -> Self {
        let start = Day(last.0.saturating_sub(days.saturating_sub(1)));
        Self { start, end: last }
    }

    pub fn contains(&self, day: Day) -> bool {
        self.start <= day && day <= self.end
    }

    /// Days in ascending order. Empty when `start > end`.
    pub fn iter(&self) -> impl Iterator<Item = Day> {
        (self.start.0..=self.end.0).map(Day)
    }
}

/// One observation of data consumed.
///
/// `content_unit_id` is `None` for aggregate live-session usage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct UsageRecord {
    pub day: Day,
    pub content_unit_id: Option<UnitId>,
    #[ts(type = "number")]
    pub expected_bytes: u64,
    #[ts(type = "number")]
    pub actual_bytes: u64,
}

/// Totals for one day.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct DaySummary {
    pub day: Day,
    #[ts(type = "number")]
    pub expected_total: u64,
    #[ts(type = "number")]
    pub actual_total: u64,
}

/// Immutable Data Wallet report for a range of days.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct WalletReport {
    pub range: DayRange,
    #[ts(type = "number")]
    pub generated_at: u64,
    /// One entry per day in the range, ascending.
    pub days: Vec<DaySummary>,
    /// Per-unit totals across the range, largest actual usage first.
    pub per_unit: Vec<UsageRecord>,
    #[ts(type = "number")]
    pub expected_total: u64,
    #[ts(type = "number")]
    pub actual_total: u64,
}
