//! Usage ledger over the `usage_records` table.

use std::path::Path;

use capsule_db::queries::{settings, usage};
use capsule_types::usage::{Day, DayRange, DaySummary, UsageRecord, WalletReport};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::{LedgerError, Result};

/// Records and aggregates data usage per day and content unit.
pub struct UsageLedger {
    conn: Connection,
}

impl UsageLedger {
    /// Open the ledger on the metadata database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(capsule_db::open(path)?))
    }

    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Add an observation for `(day, content_unit_id)`.
    ///
    /// Actual bytes accumulate across calls so resumed transfers add up;
    /// expected bytes keep the largest value reported. `None` records
    /// live-session usage.
    pub fn record(
        &self,
        day: Day,
        content_unit_id: Option<&str>,
        expected_bytes: u64,
        actual_bytes: u64,
    ) -> Result<()> {
        if self.is_closed(day)? {
            return Err(LedgerError::DayClosed(day));
        }
        usage::add(&self.conn, day, content_unit_id, expected_bytes, actual_bytes)?;
        debug!(
            day = day.0,
            unit = content_unit_id.unwrap_or("live"),
            expected_bytes,
            actual_bytes,
            "recorded usage"
        );
        Ok(())
    }

    /// Totals for one day. `actual_total` is the sum over every unit.
    pub fn summary(&self, day: Day) -> Result<DaySummary> {
        Ok(usage::day_summary(&self.conn, day)?)
    }

    /// One summary per day of `range`, ascending, with empty days as zero.
    pub fn history(&self, range: DayRange) -> Result<Vec<DaySummary>> {
        let mut recorded = usage::range_summaries(&self.conn, range)?.into_iter().peekable();
        let mut out = Vec::new();
        for day in range.iter() {
            match recorded.next_if(|s| s.day == day) {
                Some(summary) => out.push(summary),
                None => out.push(DaySummary {
                    day,
                    ..DaySummary::default()
                }),
            }
        }
        Ok(out)
    }

    /// Per-unit records for one day, largest actual usage first.
    pub fn breakdown(&self, day: Day) -> Result<Vec<UsageRecord>> {
        Ok(usage::records_for_day(&self.conn, day)?)
    }

    /// First day that still accepts records.
    pub fn first_open_day(&self) -> Result<Day> {
        let day = settings::get_u64(&self.conn, settings::WALLET_OPEN_FROM_DAY, 0)?;
        Ok(Day(u32::try_from(day).unwrap_or(u32::MAX)))
    }

    pub fn is_closed(&self, day: Day) -> Result<bool> {
        Ok(day < self.first_open_day()?)
    }

    /// Close every day before `day`. Never reopens a closed day.
    ///
    /// Returns true if the set of closed days grew.
    pub fn close_days_before(&self, day: Day) -> Result<bool> {
        let open_from = self.first_open_day()?;
        if day <= open_from {
            return Ok(false);
        }
        settings::set_u64(&self.conn, settings::WALLET_OPEN_FROM_DAY, u64::from(day.0))?;
        info!(from = open_from.0, until = day.0, "closed wallet days");
        Ok(true)
    }

    /// Snapshot report for `range`. Later records do not change it.
    pub fn report(&self, range: DayRange, generated_at: u64) -> Result<WalletReport> {
        let days = self.history(range)?;
        let per_unit = usage::per_unit_totals(&self.conn, range)?;
        let expected_total = days.iter().map(|d| d.expected_total).sum();
        let actual_total = days.iter().map(|d| d.actual_total).sum();
        Ok(WalletReport {
            range,
            generated_at,
            days,
            per_unit,
            expected_total,
            actual_total,
        })
    }
}
