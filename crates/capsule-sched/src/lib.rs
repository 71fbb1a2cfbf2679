//! # capsule-sched
//!
//! Download scheduler for capsules and resources.
//!
//! Jobs move `Queued -> Downloading -> {Downloaded, Failed}`. A failed
//! attempt with budget left returns to `Queued` after an exponential
//! backoff. Transfers run as tokio tasks; their results are applied only
//! inside [`scheduler::DownloadScheduler::tick`] and
//! [`scheduler::DownloadScheduler::settle`], which take `&mut self`.
//!
//! ## Modules
//!
//! - [`fetcher`]: the transfer seam implemented by the host.
//! - [`mock`]: scripted fetcher for tests.
//! - [`scheduler`]: queue, dispatch and state transitions.

pub mod fetcher;
pub mod mock;
pub mod scheduler;

use capsule_db::DbError;
use capsule_store::StoreError;
use capsule_types::jobs::JobError;
use capsule_types::network::NetworkError;
use capsule_types::{JobId, UnitId};
use capsule_wallet::LedgerError;

pub use fetcher::{FetchFailure, Fetcher};
pub use scheduler::{DownloadScheduler, SchedulerConfig, TickReport};

/// Error types for scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The unit already has an active job or a fresh local copy.
    #[error("'{0}' is already queued or downloaded")]
    AlreadyQueuedOrDownloaded(UnitId),

    /// The job was cancelled before it finished.
    #[error("download cancelled")]
    Cancelled,

    /// Every attempt failed.
    #[error("download failed after {attempts} attempts")]
    MaxAttemptsExceeded { attempts: u32 },

    /// A single transfer failed; the job may still be retried.
    #[error("network error: {0}")]
    Network(NetworkError),

    /// No job with this id.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Content store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Usage ledger error.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<DbError> for SchedulerError {
    fn from(e: DbError) -> Self {
        SchedulerError::Store(StoreError::from(e))
    }
}

impl From<JobError> for SchedulerError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::Network { error } => SchedulerError::Network(error),
            JobError::Cancelled => SchedulerError::Cancelled,
            JobError::MaxAttemptsExceeded { attempts, .. } => {
                SchedulerError::MaxAttemptsExceeded { attempts }
            }
            JobError::QuotaExceeded { used, limit } => {
                SchedulerError::Store(StoreError::QuotaExceeded { used, limit })
            }
            JobError::Store { message } => SchedulerError::Store(StoreError::Io(message)),
        }
    }
}

/// Convenience result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
