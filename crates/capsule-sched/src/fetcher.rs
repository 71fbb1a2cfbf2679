//! The transfer seam between the scheduler and the network.

use async_trait::async_trait;
use capsule_types::content::ContentUnit;
use capsule_types::network::NetworkError;

/// A failed transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchFailure {
    pub error: NetworkError,
    /// Bytes received before the failure. They still count as used data.
    pub bytes_transferred: u64,
}

impl FetchFailure {
    pub fn new(error: NetworkError) -> Self {
        Self {
            error,
            bytes_transferred: 0,
        }
    }

    pub fn with_transferred(error: NetworkError, bytes_transferred: u64) -> Self {
        Self {
            error,
            bytes_transferred,
        }
    }
}

/// Retrieves the bytes of a content unit.
///
/// Implementations must be cancel-safe: the scheduler aborts the task
/// running `fetch` when a job is cancelled, and partial data is dropped.
#[async_trait]
pub trait Fetcher: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, unit: &ContentUnit) -> Result<Vec<u8>, FetchFailure>;
}
