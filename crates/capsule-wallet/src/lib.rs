//! # capsule-wallet
//!
//! The Data Wallet: per-day accounting of expected vs. actual bytes.
//!
//! Records accumulate while a day is open. Once the day boundary passes the
//! host closes earlier days and they become read-only.
//!
//! ## Modules
//!
//! - [`ledger`]: the [`ledger::UsageLedger`] and report snapshots.

pub mod ledger;

use capsule_db::DbError;
use capsule_types::usage::Day;

pub use ledger::UsageLedger;

/// Error types for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The day has been closed and can no longer change.
    #[error("{0} is closed")]
    DayClosed(Day),

    /// Metadata database error.
    #[error("database error: {0}")]
    Db(#[from] DbError),
}

/// Convenience result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
