//! The content store: blob files plus metadata rows.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use capsule_db::queries::{settings, units};
use capsule_types::content::{ContentKind, ContentUnit, DownloadState, UnitFilter};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::blob;
use crate::{Result, StoreError};

/// What the recovery pass cleaned up.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Interrupted `.part` writes.
    pub partial_removed: usize,
    /// Blobs whose metadata commit never happened.
    pub orphans_removed: usize,
    /// Metadata rows pointing at a missing blob.
    pub dangling_removed: usize,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Durable store for content bytes and metadata.
///
/// A single owner is assumed; share it behind an async mutex.
pub struct ContentStore {
    conn: Connection,
    blob_dir: PathBuf,
    /// Byte allowance for stored blobs. `None` means only the disk limits it.
    hard_limit_bytes: Option<u64>,
}

impl ContentStore {
    /// Open the metadata database at `db_path` and the blob directory.
    ///
    /// Runs the recovery pass before returning.
    pub fn open(db_path: &Path, blob_dir: impl Into<PathBuf>) -> Result<Self> {
        let conn = capsule_db::open(db_path)?;
        Self::with_connection(conn, blob_dir)
    }

    /// Build a store over an already opened database.
    pub fn with_connection(conn: Connection, blob_dir: impl Into<PathBuf>) -> Result<Self> {
        let blob_dir = blob_dir.into();
        fs::create_dir_all(&blob_dir).map_err(|e| StoreError::Io(e.to_string()))?;

        let store = Self {
            conn,
            blob_dir,
            hard_limit_bytes: None,
        };

        let report = store.recover()?;
        if !report.is_clean() {
            info!(
                partial = report.partial_removed,
                orphans = report.orphans_removed,
                dangling = report.dangling_removed,
                "content store recovered from interrupted writes"
            );
        }
        Ok(store)
    }

    /// Refuse writes that would push stored bytes past `limit`.
    pub fn with_hard_limit(mut self, limit: Option<u64>) -> Self {
        self.hard_limit_bytes = limit;
        self
    }

    /// The metadata database, for components that persist alongside units.
    pub fn db(&self) -> &Connection {
        &self.conn
    }

    pub fn blob_dir(&self) -> &Path {
        &self.blob_dir
    }

    /// Reconcile blob files with metadata.
    ///
    /// Deletes `.part` leftovers, blobs no row references, and rows whose
    /// blob is gone.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut referenced: HashSet<OsString> = HashSet::new();

        for (id, path) in units::local_paths(&self.conn)? {
            if path.exists() {
                if let Some(name) = path.file_name() {
                    referenced.insert(name.to_os_string());
                }
            } else {
                warn!(id, path = %path.display(), "dropping metadata for missing blob");
                units::delete(&self.conn, &id)?;
                report.dangling_removed += 1;
            }
        }

        let entries = fs::read_dir(&self.blob_dir).map_err(|e| StoreError::Io(e.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|e| StoreError::Io(e.to_string()))?.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if ext == Some(blob::PARTIAL_EXT) {
                blob::remove_if_exists(&path)?;
                report.partial_removed += 1;
            } else if ext == Some(blob::BLOB_EXT) {
                let known = path
                    .file_name()
                    .is_some_and(|name| referenced.contains(name));
                if !known {
                    debug!(path = %path.display(), "removing orphaned blob");
                    blob::remove_if_exists(&path)?;
                    report.orphans_removed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Register catalog metadata for a unit not yet seen on this device.
    ///
    /// The unit is stored as `NotDownloaded` with its expiry derived from
    /// `created_at`. Returns false if the id is already known.
    pub fn discover(&self, unit: &ContentUnit) -> Result<bool> {
        let mut unit = unit.clone();
        let ttl = self.ttl_for(unit.kind)?;
        unit.expires_at = ttl.map(|ttl| unit.created_at.saturating_add(ttl));
        let inserted = units::insert_if_absent(&self.conn, &unit)?;
        if inserted {
            debug!(id = %unit.id, kind = unit.kind.as_str(), "discovered content unit");
        }
        Ok(inserted)
    }

    /// Store the bytes for `unit` and commit its metadata as `Downloaded`.
    ///
    /// Bytes are written and synced before the metadata row changes.
    /// `size_bytes` becomes the stored length and `expires_at` is derived
    /// from `created_at`.
    pub fn put(&self, unit: &ContentUnit, bytes: &[u8]) -> Result<ContentUnit> {
        let len = bytes.len() as u64;
        let previous = units::find(&self.conn, &unit.id)?;
        let replaced = previous
            .as_ref()
            .filter(|u| u.download_state == DownloadState::Downloaded)
            .map_or(0, |u| u.size_bytes);
        let used = units::stored_bytes(&self.conn)?.saturating_sub(replaced);

        if let Some(limit) = self.hard_limit_bytes {
            if used.saturating_add(len) > limit {
                return Err(StoreError::QuotaExceeded { used, limit });
            }
        }

        let path = blob::write_atomic(&self.blob_dir, &unit.id, bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::StorageFull {
                StoreError::QuotaExceeded {
                    used,
                    limit: self.hard_limit_bytes.unwrap_or(used),
                }
            } else {
                StoreError::Io(e.to_string())
            }
        })?;

        let ttl = self.ttl_for(unit.kind)?;
        let stored = ContentUnit {
            size_bytes: len,
            expires_at: ttl.map(|ttl| unit.created_at.saturating_add(ttl)),
            download_state: DownloadState::Downloaded,
            local_path: Some(path.clone()),
            checksum: Some(blob::checksum(bytes)),
            ..unit.clone()
        };

        if let Err(e) = units::upsert(&self.conn, &stored) {
            if let Err(cleanup) = blob::remove_if_exists(&path) {
                warn!(id = %unit.id, error = %cleanup, "failed to remove unrecorded blob");
            }
            // The new bytes replaced any earlier copy at the same path.
            if previous.as_ref().is_some_and(|u| u.local_path.is_some()) {
                if let Err(reset) =
                    units::set_state(&self.conn, &unit.id, DownloadState::NotDownloaded)
                {
                    warn!(id = %unit.id, error = %reset, "failed to reset replaced unit");
                }
            }
            return Err(e.into());
        }

        debug!(
            id = %stored.id,
            size = len,
            used = used + len,
            "stored content unit"
        );
        Ok(stored)
    }

    /// Fetch a unit's metadata.
    ///
    /// A downloaded unit whose blob has vanished is removed and reported as
    /// [`StoreError::Corrupt`].
    pub fn get(&self, id: &str) -> Result<ContentUnit> {
        let unit = units::get(&self.conn, id)?;
        if let Some(ref path) = unit.local_path {
            if !path.exists() {
                self.heal(&unit);
                return Err(StoreError::Corrupt(id.to_string()));
            }
        }
        Ok(unit)
    }

    /// Fetch a unit's metadata if it exists, without the blob check.
    pub fn find(&self, id: &str) -> Result<Option<ContentUnit>> {
        Ok(units::find(&self.conn, id)?)
    }

    /// Read the stored bytes of a downloaded unit, verifying the checksum.
    pub fn read_bytes(&self, id: &str) -> Result<Vec<u8>> {
        let unit = self.get(id)?;
        let (Some(path), Some(sum)) = (unit.local_path.as_ref(), unit.checksum.as_ref()) else {
            return Err(StoreError::NotFound(format!("no local copy of '{id}'")));
        };
        match blob::read_verified(path, sum)? {
            Some(bytes) => Ok(bytes),
            None => {
                self.heal(&unit);
                Err(StoreError::Corrupt(id.to_string()))
            }
        }
    }

    /// Delete a unit's bytes, then its metadata.
    ///
    /// Removing an unknown id succeeds. Returns true if something was removed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let Some(unit) = units::find(&self.conn, id)? else {
            return Ok(false);
        };
        if let Some(ref path) = unit.local_path {
            blob::remove_if_exists(path)?;
        }
        units::delete(&self.conn, id)?;
        debug!(id, "removed content unit");
        Ok(true)
    }

    /// Units of `kind` (all kinds when `None`) matching `filter`, oldest first.
    ///
    /// Each call reads a fresh snapshot.
    pub fn list(
        &self,
        kind: Option<ContentKind>,
        filter: &UnitFilter,
    ) -> Result<impl Iterator<Item = ContentUnit>> {
        let filter = filter.clone();
        let rows = units::list(&self.conn, kind)?;
        Ok(rows.into_iter().filter(move |u| filter.matches(u)))
    }

    /// Move a unit to a non-downloaded state, releasing any stored bytes.
    pub fn set_state(&self, id: &str, state: DownloadState) -> Result<()> {
        if let Some(unit) = units::find(&self.conn, id)? {
            if let Some(ref path) = unit.local_path {
                blob::remove_if_exists(path)?;
            }
        }
        units::set_state(&self.conn, id, state)?;
        Ok(())
    }

    /// Drop stored bytes and return the unit to `NotDownloaded`.
    pub fn discard_bytes(&self, id: &str) -> Result<()> {
        self.set_state(id, DownloadState::NotDownloaded)
    }

    /// Total bytes of downloaded units.
    pub fn used_bytes(&self) -> Result<u64> {
        Ok(units::stored_bytes(&self.conn)?)
    }

    pub fn hard_limit_bytes(&self) -> Option<u64> {
        self.hard_limit_bytes
    }

    pub fn auto_delete_resources(&self) -> Result<bool> {
        Ok(settings::get_bool(
            &self.conn,
            settings::AUTO_DELETE_RESOURCES,
            false,
        )?)
    }

    /// Toggle the resource TTL and re-derive `expires_at` for every resource.
    ///
    /// Returns the number of resources updated.
    pub fn set_auto_delete_resources(&self, enabled: bool) -> Result<usize> {
        settings::set_bool(&self.conn, settings::AUTO_DELETE_RESOURCES, enabled)?;
        let ttl = ContentKind::Resource.ttl_secs(enabled);

        let mut updated = 0;
        for mut unit in units::list(&self.conn, Some(ContentKind::Resource))? {
            let expires_at = ttl.map(|ttl| unit.created_at.saturating_add(ttl));
            if unit.expires_at != expires_at {
                unit.expires_at = expires_at;
                units::upsert(&self.conn, &unit)?;
                updated += 1;
            }
        }
        info!(enabled, updated, "resource auto-delete changed");
        Ok(updated)
    }

    /// TTL applied to units of `kind` under current settings.
    pub fn ttl_for(&self, kind: ContentKind) -> Result<Option<u64>> {
        Ok(kind.ttl_secs(self.auto_delete_resources()?))
    }

    /// Drop a broken entry entirely. Failures are logged; the caller already
    /// reports the corruption.
    fn heal(&self, unit: &ContentUnit) {
        warn!(id = %unit.id, "content unit corrupt, removing");
        if let Some(ref path) = unit.local_path {
            if let Err(e) = blob::remove_if_exists(path) {
                warn!(id = %unit.id, error = %e, "failed to delete corrupt blob");
            }
        }
        if let Err(e) = units::delete(&self.conn, &unit.id) {
            warn!(id = %unit.id, error = %e, "failed to delete corrupt metadata");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_types::CAPSULE_TTL_SECS;

    fn test_store(dir: &Path) -> ContentStore {
        let conn = capsule_db::open_memory().expect("open test db");
        ContentStore::with_connection(conn, dir.join("blobs")).expect("open store")
    }

    #[test]
    fn test_put_then_get() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let unit = ContentUnit::capsule("c3", "Capsule 3", 500_000, 1_000);

        let stored = store.put(&unit, &vec![7u8; 500_000]).expect("put");
        assert_eq!(stored.download_state, DownloadState::Downloaded);
        assert_eq!(stored.expires_at, Some(1_000 + CAPSULE_TTL_SECS));

        let loaded = store.get("c3").expect("get");
        assert_eq!(loaded, stored);
        let path = loaded.local_path.expect("local path");
        assert!(path.exists());
        assert_eq!(store.read_bytes("c3").expect("read"), vec![7u8; 500_000]);
        assert_eq!(store.used_bytes().expect("used"), 500_000);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        assert!(matches!(store.get("ghost"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let stored = store
            .put(&ContentUnit::capsule("c1", "Capsule 1", 10, 0), b"0123456789")
            .expect("put");
        let path = stored.local_path.expect("path");

        assert!(store.remove("c1").expect("remove"));
        assert!(!path.exists());
        assert!(!store.remove("c1").expect("remove again"));
        assert!(matches!(store.get("c1"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_hard_limit_rejects_put() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path()).with_hard_limit(Some(100));
        store
            .put(&ContentUnit::capsule("a", "A", 60, 0), &[0u8; 60])
            .expect("first fits");

        let err = store
            .put(&ContentUnit::capsule("b", "B", 60, 0), &[0u8; 60])
            .expect_err("second exceeds");
        assert!(matches!(err, StoreError::QuotaExceeded { used: 60, limit: 100 }));
        assert!(matches!(store.get("b"), Err(StoreError::NotFound(_))));

        // Replacing an existing unit only counts the difference.
        store
            .put(&ContentUnit::capsule("a", "A", 90, 0), &[1u8; 90])
            .expect("replacement fits");
    }

    #[test]
    fn test_missing_blob_heals_as_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let stored = store
            .put(&ContentUnit::resource("r1", "Notes", 3, 0), b"abc")
            .expect("put");
        fs::remove_file(stored.local_path.expect("path")).expect("delete blob");

        assert!(matches!(store.get("r1"), Err(StoreError::Corrupt(_))));
        assert!(matches!(store.get("r1"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_checksum_mismatch_heals_as_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let stored = store
            .put(&ContentUnit::capsule("c1", "C", 4, 0), b"good")
            .expect("put");
        let path = stored.local_path.expect("path");
        fs::write(&path, b"bad!").expect("corrupt blob");

        assert!(matches!(store.read_bytes("c1"), Err(StoreError::Corrupt(_))));
        assert!(!path.exists());
        assert!(store.find("c1").expect("find").is_none());
    }

    #[test]
    fn test_recovery_removes_orphans_and_partials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blob_dir = dir.path().join("blobs");
        let db_path = dir.path().join("capsule.db");

        {
            let store = ContentStore::open(&db_path, &blob_dir).expect("open");
            store
                .put(&ContentUnit::capsule("kept", "Kept", 4, 0), b"keep")
                .expect("put");
        }

        // A blob written without a metadata commit, and an interrupted write.
        let orphan = blob::write_atomic(&blob_dir, "crashed", b"orphan").expect("orphan");
        let partial = blob_dir.join("deadbeef.part");
        fs::write(&partial, b"half").expect("partial");

        let store = ContentStore::open(&db_path, &blob_dir).expect("reopen");
        assert!(!orphan.exists());
        assert!(!partial.exists());
        assert_eq!(store.read_bytes("kept").expect("kept survives"), b"keep");
    }

    #[test]
    fn test_recovery_drops_rows_without_blob() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let stored = store
            .put(&ContentUnit::capsule("c1", "C", 1, 0), b"x")
            .expect("put");
        fs::remove_file(stored.local_path.expect("path")).expect("remove");

        let report = store.recover().expect("recover");
        assert_eq!(report.dangling_removed, 1);
        assert!(store.find("c1").expect("find").is_none());
    }

    #[test]
    fn test_discover_does_not_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        store
            .put(&ContentUnit::capsule("c1", "Capsule 1", 2, 0), b"hi")
            .expect("put");

        assert!(!store
            .discover(&ContentUnit::capsule("c1", "Capsule 1", 2, 50))
            .expect("discover"));
        assert_eq!(
            store.get("c1").expect("get").download_state,
            DownloadState::Downloaded
        );

        assert!(store
            .discover(&ContentUnit::capsule("c2", "Capsule 2", 2, 50))
            .expect("discover"));
        let fresh = store.get("c2").expect("get");
        assert_eq!(fresh.download_state, DownloadState::NotDownloaded);
        assert_eq!(fresh.expires_at, Some(50 + CAPSULE_TTL_SECS));
    }

    #[test]
    fn test_list_filters_lazily_per_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        store
            .discover(&ContentUnit::capsule("c1", "Algebra", 1, 0))
            .expect("discover");
        store
            .discover(&ContentUnit::capsule("c2", "History", 1, 1))
            .expect("discover");
        store
            .discover(&ContentUnit::resource("r1", "Algebra_Slides.pptx", 1, 2))
            .expect("discover");

        let filter = UnitFilter {
            title_contains: Some("algebra".into()),
            ..Default::default()
        };
        let capsules: Vec<_> = store
            .list(Some(ContentKind::Capsule), &filter)
            .expect("list")
            .map(|u| u.id)
            .collect();
        assert_eq!(capsules, vec!["c1"]);

        assert_eq!(store.list(None, &filter).expect("list").count(), 2);
        assert_eq!(store.list(None, &UnitFilter::default()).expect("list").count(), 3);
    }

    #[test]
    fn test_set_state_releases_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let stored = store
            .put(&ContentUnit::capsule("c1", "C", 3, 0), b"old")
            .expect("put");
        let path = stored.local_path.expect("path");

        store.set_state("c1", DownloadState::Queued).expect("set state");
        assert!(!path.exists());
        let unit = store.get("c1").expect("get");
        assert_eq!(unit.download_state, DownloadState::Queued);
        assert_eq!(store.used_bytes().expect("used"), 0);
    }

    #[test]
    fn test_failed_replace_does_not_leave_stale_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let old = store
            .put(&ContentUnit::capsule("c1", "C", 3, 0), b"old")
            .expect("put");
        let path = old.local_path.expect("path");

        store
            .db()
            .execute_batch(
                "CREATE TRIGGER reject_replacement BEFORE UPDATE ON content_units
                 WHEN NEW.title = 'replacement'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .expect("trigger");

        let replacement = ContentUnit::capsule("c1", "replacement", 3, 0);
        assert!(store.put(&replacement, b"new").is_err());

        assert!(!path.exists());
        let unit = store.get("c1").expect("get");
        assert_eq!(unit.title, "C");
        assert_eq!(unit.download_state, DownloadState::NotDownloaded);
        assert_eq!(unit.local_path, None);
        assert_eq!(store.used_bytes().expect("used"), 0);
    }

    #[test]
    fn test_auto_delete_resources_rederives_expiry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        store
            .put(&ContentUnit::resource("r1", "Week1_Notes.pdf", 3, 100), b"pdf")
            .expect("put");
        assert_eq!(store.get("r1").expect("get").expires_at, None);

        assert_eq!(store.set_auto_delete_resources(true).expect("enable"), 1);
        assert_eq!(
            store.get("r1").expect("get").expires_at,
            Some(100 + CAPSULE_TTL_SECS)
        );

        assert_eq!(store.set_auto_delete_resources(false).expect("disable"), 1);
        assert_eq!(store.get("r1").expect("get").expires_at, None);
    }
}
