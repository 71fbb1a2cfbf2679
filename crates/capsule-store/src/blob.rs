//! Blob files: one file per content unit under the blob directory.
//!
//! File names are the BLAKE3 hash of the unit id, so arbitrary ids never
//! reach the filesystem. Writes go to a `.part` file that is synced and then
//! renamed into place.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::{Result, StoreError};

/// Extension of committed blobs.
pub const BLOB_EXT: &str = "blob";

/// Extension of in-progress writes.
pub const PARTIAL_EXT: &str = "part";

/// Blob path for a unit id.
pub fn blob_path(dir: &Path, id: &str) -> PathBuf {
    let name = hex::encode(blake3::hash(id.as_bytes()).as_bytes());
    dir.join(format!("{name}.{BLOB_EXT}"))
}

/// Hex BLAKE3 digest of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// Write `bytes` as the blob for `id`, replacing any previous blob.
///
/// `dir` must exist. Returns the committed path. On error no `.part` file
/// is left behind.
pub fn write_atomic(dir: &Path, id: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    let target = blob_path(dir, id);
    let partial = target.with_extension(PARTIAL_EXT);

    let written = File::create(&partial)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&partial, &target));

    if let Err(e) = written {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    Ok(target)
}

/// Read a blob and check it against `expected` checksum.
///
/// Returns `Ok(None)` when the file is missing or the digest differs.
pub fn read_verified(path: &Path, expected: &str) -> Result<Option<Vec<u8>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::Io(e.to_string())),
    };
    if checksum(&bytes) != expected {
        return Ok(None);
    }
    Ok(Some(bytes))
}

/// Delete a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::Io(e.to_string())),
    }
}
