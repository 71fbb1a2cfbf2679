//! Forward-only schema migrations keyed on `PRAGMA user_version`.
//!
//! A fresh database gets the full current schema in one step. An older one
//! replays [`STEPS`] from its version up. There is no downgrade path; a
//! database from a newer build is refused.

use rusqlite::{Connection, Transaction};
use tracing::info;

use crate::queries::settings;
use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Incremental upgrades, `(target_version, sql)`, in ascending order.
/// Version 1 is the initial schema and has no step.
const STEPS: &[(u32, &str)] = &[];

/// Settings every database starts with.
const DEFAULT_SETTINGS: [(&str, &str); 4] = [
    (settings::AUTO_DELETE_RESOURCES, "false"),
    (settings::NETWORK_LINK, "offline"),
    (settings::WALLET_OPEN_FROM_DAY, "0"),
    (settings::APP_ROLE, "student"),
];

/// Bring the schema up to [`SCHEMA_VERSION`].
pub fn run(conn: &Connection) -> Result<()> {
    let found = user_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database is at v{found}, this build understands up to v{SCHEMA_VERSION}"
        )));
    }
    if found == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    if found == 0 {
        info!(version = SCHEMA_VERSION, "creating metadata schema");
        create(&tx)?;
    } else {
        upgrade(&tx, found)?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn user_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn create(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(schema::SCHEMA_V1)?;
    let mut insert = tx.prepare("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")?;
    for (key, value) in DEFAULT_SETTINGS {
        insert.execute([key, value])?;
    }
    Ok(())
}

fn upgrade(tx: &Transaction<'_>, from: u32) -> Result<()> {
    for version in (from + 1)..=SCHEMA_VERSION {
        let sql = STEPS
            .iter()
            .find(|(v, _)| *v == version)
            .map(|(_, sql)| *sql)
            .ok_or_else(|| DbError::Migration(format!("no upgrade step to v{version}")))?;
        info!(version, "upgrading metadata schema");
        tx.execute_batch(sql)?;
    }
    Ok(())
}
