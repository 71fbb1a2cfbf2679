//! Content units: lecture capsules and cached resources.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{UnitId, CAPSULE_TTL_SECS};

/// What a content unit is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Packaged lecture (slides + audio) cached for offline playback.
    Capsule,
    /// Standalone document such as notes or slide decks.
    Resource,
}

impl ContentKind {
    /// Stable name used in the metadata table.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Capsule => "capsule",
            ContentKind::Resource => "resource",
        }
    }

    /// Parse the stable name written by [`ContentKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "capsule" => Some(ContentKind::Capsule),
            "resource" => Some(ContentKind::Resource),
            _ => None,
        }
    }

    /// Time-to-live for units of this kind.
    ///
    /// Capsules always expire after [`CAPSULE_TTL_SECS`]. Resources only
    /// expire when auto-delete of cached resources is switched on.
    pub fn ttl_secs(&self, auto_delete_resources: bool) -> Option<u64> {
        match self {
            ContentKind::Capsule => Some(CAPSULE_TTL_SECS),
            ContentKind::Resource if auto_delete_resources => Some(CAPSULE_TTL_SECS),
            ContentKind::Resource => None,
        }
    }
}

/// Where a content unit is in its download lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    NotDownloaded,
    Queued,
    Downloading,
    Downloaded,
    Failed,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::NotDownloaded => "not_downloaded",
            DownloadState::Queued => "queued",
            DownloadState::Downloading => "downloading",
            DownloadState::Downloaded => "downloaded",
            DownloadState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_downloaded" => Some(DownloadState::NotDownloaded),
            "queued" => Some(DownloadState::Queued),
            "downloading" => Some(DownloadState::Downloading),
            "downloaded" => Some(DownloadState::Downloaded),
            "failed" => Some(DownloadState::Failed),
            _ => None,
        }
    }

    /// True while a download job is waiting for or running a transfer.
    ///
    /// Units in this state are never evicted.
    pub fn has_active_job(&self) -> bool {
        matches!(self, DownloadState::Queued | DownloadState::Downloading)
    }
}

/// A capsule or resource known to this device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct ContentUnit {
    pub id: UnitId,
    pub kind: ContentKind,
    pub title: String,
    /// Catalog size; the expected transfer volume for the Data Wallet.
    #[ts(type = "number")]
    pub size_bytes: u64,
    #[ts(type = "number")]
    pub created_at: u64,
    /// Always `created_at + ttl` when set.
    #[ts(type = "number | null")]
    pub expires_at: Option<u64>,
    pub download_state: DownloadState,
    /// Present iff `download_state` is `Downloaded`.
    #[ts(type = "string | null")]
    pub local_path: Option<PathBuf>,
    /// BLAKE3 hex digest of the stored bytes. Present iff downloaded.
    pub checksum: Option<String>,
    /// Override for the fetch location. `None` uses the configured base URL.
    pub source_url: Option<String>,
}

impl ContentUnit {
    /// Build catalog metadata for a unit that has not been downloaded yet.
    pub fn new(
        id: impl Into<UnitId>,
        kind: ContentKind,
        title: impl Into<String>,
        size_bytes: u64,
        created_at: u64,
        ttl_secs: Option<u64>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            size_bytes,
            created_at,
            expires_at: ttl_secs.map(|ttl| created_at.saturating_add(ttl)),
            download_state: DownloadState::NotDownloaded,
            local_path: None,
            checksum: None,
            source_url: None,
        }
    }

    /// Shorthand for a capsule with the fixed capsule TTL.
    pub fn capsule(id: impl Into<UnitId>, title: impl Into<String>, size_bytes: u64, now: u64) -> Self {
        Self::new(id, ContentKind::Capsule, title, size_bytes, now, Some(CAPSULE_TTL_SECS))
    }

    /// Shorthand for a resource that never expires on its own.
    pub fn resource(id: impl Into<UnitId>, title: impl Into<String>, size_bytes: u64, now: u64) -> Self {
        Self::new(id, ContentKind::Resource, title, size_bytes, now, None)
    }

    /// Restart the TTL window at `now`.
    pub fn refresh_lifetime(&mut self, now: u64, ttl_secs: Option<u64>) {
        self.created_at = now;
        self.expires_at = ttl_secs.map(|ttl| now.saturating_add(ttl));
    }

    /// True once the unit has reached its expiry time.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// True when the bytes are on disk and still within their lifetime.
    pub fn is_fresh_download(&self, now: u64) -> bool {
        self.download_state == DownloadState::Downloaded && !self.is_expired(now)
    }
}

/// Optional constraints for catalog listings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFilter {
    /// Only units in this download state.
    #[serde(default)]
    pub state: Option<DownloadState>,
    /// Case-insensitive substring match on the title.
    #[serde(default)]
    pub title_contains: Option<String>,
}

impl UnitFilter {
    pub fn matches(&self, unit: &ContentUnit) -> bool {
        if let Some(state) = self.state {
            if unit.download_state != state {
                return false;
            }
        }
        if let Some(ref needle) = self.title_contains {
            if !unit.title.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}
