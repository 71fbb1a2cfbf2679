//! Settings query functions.
//!
//! Runtime settings the UI can flip while the daemon is running. Static
//! configuration lives in `config.toml` instead.

use rusqlite::Connection;

use crate::{DbError, Result};

/// Whether cached resources get the capsule TTL ("true" / "false").
pub const AUTO_DELETE_RESOURCES: &str = "auto_delete_resources";

/// Last uplink reported by the host ("offline" / "metered" / "unmetered").
pub const NETWORK_LINK: &str = "network_link";

/// First Data Wallet day still open for recording.
pub const WALLET_OPEN_FROM_DAY: &str = "wallet_open_from_day";

/// Role the app was last switched to.
pub const APP_ROLE: &str = "app_role";

/// Highest download job id ever handed out. Finished jobs are deleted, so
/// the table alone cannot tell.
pub const LAST_JOB_ID: &str = "last_job_id";

/// Get a setting value by key.
pub fn get(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            DbError::NotFound(format!("setting '{key}'"))
        }
        other => DbError::Sqlite(other),
    })
}

/// Set a setting value.
pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

/// Get a setting as a boolean, defaulting to `default` if not found.
pub fn get_bool(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    match get(conn, key) {
        Ok(v) => Ok(v == "true" || v == "1"),
        Err(DbError::NotFound(_)) => Ok(default),
        Err(e) => Err(e),
    }
}

pub fn set_bool(conn: &Connection, key: &str, value: bool) -> Result<()> {
    set(conn, key, if value { "true" } else { "false" })
}

/// Get a setting as u64, defaulting to `default` if not found.
pub fn get_u64(conn: &Connection, key: &str, default: u64) -> Result<u64> {
    match get(conn, key) {
        Ok(v) => v
            .parse()
            .map_err(|e: std::num::ParseIntError| DbError::Serialization(e.to_string())),
        Err(DbError::NotFound(_)) => Ok(default),
        Err(e) => Err(e),
    }
}

pub fn set_u64(conn: &Connection, key: &str, value: u64) -> Result<()> {
    set(conn, key, &value.to_string())
}
