//! Content unit metadata queries.

use std::path::PathBuf;

use capsule_types::content::{ContentKind, ContentUnit, DownloadState};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{to_i64, to_u64, DbError, Result};

const COLUMNS: &str = "id, kind, title, size_bytes, created_at, expires_at,
                       download_state, local_path, checksum, source_url";

/// Insert or replace the full metadata row for a unit.
pub fn upsert(conn: &Connection, unit: &ContentUnit) -> Result<()> {
    conn.execute(
        "INSERT INTO content_units
         (id, kind, title, size_bytes, created_at, expires_at,
          download_state, local_path, checksum, source_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            kind = excluded.kind,
            title = excluded.title,
            size_bytes = excluded.size_bytes,
            created_at = excluded.created_at,
            expires_at = excluded.expires_at,
            download_state = excluded.download_state,
            local_path = excluded.local_path,
            checksum = excluded.checksum,
            source_url = excluded.source_url",
        rusqlite::params![
            unit.id,
            unit.kind.as_str(),
            unit.title,
            to_i64(unit.size_bytes),
            to_i64(unit.created_at),
            unit.expires_at.map(to_i64),
            unit.download_state.as_str(),
            unit.local_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
            unit.checksum,
            unit.source_url,
        ],
    )?;
    Ok(())
}

/// Insert a unit unless one with the same id exists. Returns true if inserted.
pub fn insert_if_absent(conn: &Connection, unit: &ContentUnit) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO content_units
         (id, kind, title, size_bytes, created_at, expires_at,
          download_state, local_path, checksum, source_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'not_downloaded', NULL, NULL, ?7)",
        rusqlite::params![
            unit.id,
            unit.kind.as_str(),
            unit.title,
            to_i64(unit.size_bytes),
            to_i64(unit.created_at),
            unit.expires_at.map(to_i64),
            unit.source_url,
        ],
    )?;
    Ok(inserted == 1)
}

/// Fetch one unit.
pub fn get(conn: &Connection, id: &str) -> Result<ContentUnit> {
    find(conn, id)?.ok_or_else(|| DbError::NotFound(format!("content unit '{id}'")))
}

/// Fetch one unit if it exists.
pub fn find(conn: &Connection, id: &str) -> Result<Option<ContentUnit>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM content_units WHERE id = ?1"),
            [id],
            read_row,
        )
        .optional()?;
    row.transpose()
}

/// List units, optionally of one kind, oldest first.
pub fn list(conn: &Connection, kind: Option<ContentKind>) -> Result<Vec<ContentUnit>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM content_units
         WHERE ?1 IS NULL OR kind = ?1
         ORDER BY created_at ASC, id ASC"
    ))?;

    let rows = stmt
        .query_map([kind.map(|k| k.as_str())], read_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().collect()
}

/// Change only the download state. Fails if the unit is unknown.
///
/// Moving to `Downloaded` goes through [`upsert`] instead, since it also needs
/// a local path.
pub fn set_state(conn: &Connection, id: &str, state: DownloadState) -> Result<()> {
    if state == DownloadState::Downloaded {
        return Err(DbError::Serialization(
            "downloaded state requires a local path".into(),
        ));
    }
    let updated = conn.execute(
        "UPDATE content_units
         SET download_state = ?1, local_path = NULL, checksum = NULL
         WHERE id = ?2",
        rusqlite::params![state.as_str(), id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("content unit '{id}'")));
    }
    Ok(())
}

/// Delete a unit's metadata. Returns true if a row was removed.
pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM content_units WHERE id = ?1", [id])?;
    Ok(deleted == 1)
}

/// All local paths referenced by downloaded units.
pub fn local_paths(conn: &Connection) -> Result<Vec<(String, PathBuf)>> {
    let mut stmt = conn.prepare(
        "SELECT id, local_path FROM content_units WHERE local_path IS NOT NULL",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, PathBuf::from(row.get::<_, String>(1)?)))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Total bytes held by downloaded units.
pub fn stored_bytes(conn: &Connection) -> Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(size_bytes), 0) FROM content_units
         WHERE download_state = 'downloaded'",
        [],
        |row| row.get(0),
    )?;
    Ok(to_u64(total))
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<ContentUnit>> {
    let kind: String = row.get(1)?;
    let state: String = row.get(6)?;
    let local_path: Option<String> = row.get(7)?;

    let Some(kind) = ContentKind::parse(&kind) else {
        return Ok(Err(DbError::Serialization(format!("unknown kind '{kind}'"))));
    };
    let Some(download_state) = DownloadState::parse(&state) else {
        return Ok(Err(DbError::Serialization(format!(
            "unknown download state '{state}'"
        ))));
    };

    Ok(Ok(ContentUnit {
        id: row.get(0)?,
        kind,
        title: row.get(2)?,
        size_bytes: to_u64(row.get(3)?),
        created_at: to_u64(row.get(4)?),
        expires_at: row.get::<_, Option<i64>>(5)?.map(to_u64),
        download_state,
        local_path: local_path.map(PathBuf::from),
        checksum: row.get(8)?,
        source_url: row.get(9)?,
    }))
}
