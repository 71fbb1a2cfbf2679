//! Download jobs owned by the scheduler.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::network::NetworkError;
use crate::{JobId, UnitId};

/// Job state machine: `Queued -> Downloading -> {Downloaded, Failed}`.
///
/// A failed attempt with budget left goes back to `Queued`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Downloading,
    Downloaded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Downloading => "downloading",
            JobState::Downloaded => "downloaded",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobState::Queued),
            "downloading" => Some(JobState::Downloading),
            "downloaded" => Some(JobState::Downloaded),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Downloading)
    }
}

/// Why a job's latest attempt did not succeed. Kept for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, TS, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobError {
    #[error("{error}")]
    Network { error: NetworkError },

    #[error("download cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {last}")]
    MaxAttemptsExceeded { attempts: u32, last: NetworkError },

    #[error("storage quota exceeded: used {used} of {limit} bytes")]
    QuotaExceeded {
        #[ts(type = "number")]
        used: u64,
        #[ts(type = "number")]
        limit: u64,
    },

    #[error("storage error: {message}")]
    Store { message: String },
}

impl JobError {
    /// Terminal errors stop the job regardless of remaining attempts.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobError::Network { .. })
    }
}

impl From<NetworkError> for JobError {
    fn from(error: NetworkError) -> Self {
        JobError::Network { error }
    }
}

/// A queued unit of work against one content unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct DownloadJob {
    #[ts(type = "number")]
    pub id: JobId,
    /// Weak reference; the job is dropped if the unit disappears.
    pub content_unit_id: UnitId,
    /// Higher runs first.
    pub priority: i32,
    /// Earliest time the job may be dispatched.
    #[ts(type = "number")]
    pub scheduled_at: u64,
    pub attempts: u32,
    pub state: JobState,
    pub last_error: Option<JobError>,
}

impl DownloadJob {
    pub fn new(id: JobId, content_unit_id: impl Into<UnitId>, priority: i32, now: u64) -> Self {
        Self {
            id,
            content_unit_id: content_unit_id.into(),
            priority,
            scheduled_at: now,
            attempts: 0,
            state: JobState::Queued,
            last_error: None,
        }
    }

    /// Queued and due at `now`.
    pub fn is_eligible(&self, now: u64) -> bool {
        self.state == JobState::Queued && self.scheduled_at <= now
    }
}
