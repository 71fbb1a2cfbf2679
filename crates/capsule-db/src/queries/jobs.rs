//! Download queue persistence.
//!
//! The scheduler owns job state in memory and writes every transition
//! through here so a restart can resume the queue.

use capsule_types::jobs::{DownloadJob, JobError, JobState};
use capsule_types::JobId;
use rusqlite::{Connection, Row};

use crate::queries::settings;
use crate::{to_i64, to_u64, DbError, Result};

/// Insert or replace a job row.
pub fn upsert(conn: &Connection, job: &DownloadJob) -> Result<()> {
    let last_error = job
        .last_error
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DbError::Serialization(e.to_string()))?;

    conn.execute(
        "INSERT OR REPLACE INTO download_jobs
         (id, content_unit_id, priority, scheduled_at, attempts, state, last_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            to_i64(job.id),
            job.content_unit_id,
            job.priority,
            to_i64(job.scheduled_at),
            job.attempts,
            job.state.as_str(),
            last_error,
        ],
    )?;
    Ok(())
}

/// Delete a job row. Returns true if it existed.
pub fn delete(conn: &Connection, id: JobId) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM download_jobs WHERE id = ?1", [to_i64(id)])?;
    Ok(deleted == 1)
}

/// Load every persisted job in id order.
pub fn list(conn: &Connection) -> Result<Vec<DownloadJob>> {
    let mut stmt = conn.prepare(
        "SELECT id, content_unit_id, priority, scheduled_at, attempts, state, last_error
         FROM download_jobs ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map([], read_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().collect()
}

/// Highest job id ever allocated, or 0.
pub fn last_id(conn: &Connection) -> Result<JobId> {
    let in_table: i64 = conn.query_row(
        "SELECT COALESCE(MAX(id), 0) FROM download_jobs",
        [],
        |row| row.get(0),
    )?;
    let mark = settings::get_u64(conn, settings::LAST_JOB_ID, 0)?;
    Ok(mark.max(to_u64(in_table)))
}

/// Reserve the next job id. Ids are never handed out twice, even after the
/// job row is deleted.
pub fn allocate_id(conn: &Connection) -> Result<JobId> {
    let id = last_id(conn)?.saturating_add(1);
    settings::set_u64(conn, settings::LAST_JOB_ID, id)?;
    Ok(id)
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<DownloadJob>> {
    let state: String = row.get(5)?;
    let last_error: Option<String> = row.get(6)?;

    let Some(state) = JobState::parse(&state) else {
        return Ok(Err(DbError::Serialization(format!("unknown job state '{state}'"))));
    };
    let last_error = match last_error.map(|s| serde_json::from_str::<JobError>(&s)).transpose() {
        Ok(e) => e,
        Err(e) => return Ok(Err(DbError::Serialization(e.to_string()))),
    };

    Ok(Ok(DownloadJob {
        id: to_u64(row.get(0)?),
        content_unit_id: row.get(1)?,
        priority: row.get(2)?,
        scheduled_at: to_u64(row.get(3)?),
        attempts: row.get(4)?,
        state,
        last_error,
    }))
}
