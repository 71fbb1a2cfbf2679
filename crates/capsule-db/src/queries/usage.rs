//! Data Wallet usage record queries.

use capsule_types::usage::{Day, DayRange, DaySummary, UsageRecord};
use rusqlite::{Connection, Row};

use crate::{to_i64, to_u64, Result};

/// Key used for aggregate live-session usage, which has no content unit.
pub const LIVE_SESSION_KEY: &str = "";

/// Add an observation for `(day, unit)`.
///
/// Actual bytes accumulate; expected bytes keep the largest value seen.
pub fn add(
    conn: &Connection,
    day: Day,
    content_unit_id: Option<&str>,
    expected_bytes: u64,
    actual_bytes: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO usage_records (day, unit_key, expected_bytes, actual_bytes)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(day, unit_key) DO UPDATE SET
            expected_bytes = MAX(expected_bytes, excluded.expected_bytes),
            actual_bytes = actual_bytes + excluded.actual_bytes",
        rusqlite::params![
            day.0,
            content_unit_id.unwrap_or(LIVE_SESSION_KEY),
            to_i64(expected_bytes),
            to_i64(actual_bytes),
        ],
    )?;
    Ok(())
}

/// Totals for a single day. Zero when nothing was recorded.
pub fn day_summary(conn: &Connection, day: Day) -> Result<DaySummary> {
    let (expected, actual): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(expected_bytes), 0), COALESCE(SUM(actual_bytes), 0)
         FROM usage_records WHERE day = ?1",
        [day.0],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(DaySummary {
        day,
        expected_total: to_u64(expected),
        actual_total: to_u64(actual),
    })
}

/// Per-day totals for days in `range` that have records, ascending.
pub fn range_summaries(conn: &Connection, range: DayRange) -> Result<Vec<DaySummary>> {
    let mut stmt = conn.prepare(
        "SELECT day, SUM(expected_bytes), SUM(actual_bytes)
         FROM usage_records
         WHERE day BETWEEN ?1 AND ?2
         GROUP BY day
         ORDER BY day ASC",
    )?;
    let rows = stmt
        .query_map([range.start.0, range.end.0], |row| {
            Ok(DaySummary {
                day: Day(row.get(0)?),
                expected_total: to_u64(row.get(1)?),
                actual_total: to_u64(row.get(2)?),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every record of one day, largest actual usage first.
pub fn records_for_day(conn: &Connection, day: Day) -> Result<Vec<UsageRecord>> {
    let mut stmt = conn.prepare(
        "SELECT day, unit_key, expected_bytes, actual_bytes
         FROM usage_records WHERE day = ?1
         ORDER BY actual_bytes DESC, unit_key ASC",
    )?;
    let rows = stmt
        .query_map([day.0], read_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Totals per unit across `range`, largest actual usage first.
///
/// The `day` of each returned record is the last day of the range.
pub fn per_unit_totals(conn: &Connection, range: DayRange) -> Result<Vec<UsageRecord>> {
    let mut stmt = conn.prepare(
        "SELECT ?2, unit_key, SUM(expected_bytes), SUM(actual_bytes)
         FROM usage_records
         WHERE day BETWEEN ?1 AND ?2
         GROUP BY unit_key
         ORDER BY SUM(actual_bytes) DESC, unit_key ASC",
    )?;
    let rows = stmt
        .query_map([range.start.0, range.end.0], read_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<UsageRecord> {
    let unit_key: String = row.get(1)?;
    Ok(UsageRecord {
        day: Day(row.get(0)?),
        content_unit_id: (unit_key != LIVE_SESSION_KEY).then_some(unit_key),
        expected_bytes: to_u64(row.get(2)?),
        actual_bytes: to_u64(row.get(3)?),
    })
}
