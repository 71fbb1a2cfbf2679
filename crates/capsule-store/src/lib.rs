//! # capsule-store
//!
//! Local storage for downloaded capsules and resources.
//!
//! Bytes live in one blob file per unit; metadata lives in the SQLite
//! database from `capsule-db`. A write lands the blob first and commits the
//! metadata second, so a crash in between leaves only an orphaned blob that
//! the recovery pass at open removes.
//!
//! ## Modules
//!
//! - [`blob`]: blob file naming, atomic writes and checksums.
//! - [`store`]: the [`store::ContentStore`] itself.
//! - [`expiry`]: TTL and quota eviction sweeps.

pub mod blob;
pub mod expiry;
pub mod store;

use capsule_db::DbError;

pub use store::ContentStore;

/// Error types for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Writing would exceed the storage allowance or the disk is full.
    #[error("storage quota exceeded: used {used} of {limit} bytes")]
    QuotaExceeded { used: u64, limit: u64 },

    /// Stored bytes are missing or fail their checksum. The entry has
    /// already been removed when this is returned.
    #[error("corrupt content unit: {0}")]
    Corrupt(String),

    /// No such content unit, or no local copy of it.
    #[error("not found: {0}")]
    NotFound(String),

    /// Metadata database error.
    #[error("database error: {0}")]
    Db(DbError),

    /// I/O error on blob files.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => StoreError::NotFound(what),
            other => StoreError::Db(other),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Db(DbError::Sqlite(e))
    }
}

/// Convenience result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
