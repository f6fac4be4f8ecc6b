//! Atomic file helpers shared by the object store and the metadata files.
//!
//! Every write goes to a temporary file in the destination directory, is
//! synced, and is then renamed into place, so readers only ever see a
//! complete old file or a complete new one.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tempfile::NamedTempFile;

use crate::storage::error::{StorageError, StorageResult};

#[derive(Deserialize)]
struct VersionProbe {
    schema_version: u32,
}

/// decode a metadata record after checking its `schema_version`
pub(crate) fn decode_versioned<T: DeserializeOwned>(
    path: &Path,
    bytes: &[u8],
    expected: u32,
) -> StorageResult<T> {
    let probe: VersionProbe = serde_json::from_slice(bytes)?;
    if probe.schema_version != expected {
        return Err(StorageError::UnsupportedSchema {
            path: path.to_path_buf(),
            found: probe.schema_version,
        });
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// read a file, mapping "does not exist" to `None`
pub(crate) fn read_optional(path: &Path) -> StorageResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path)(e)),
    }
}

/// create the parent directory of `path` if needed; safe to race
pub(crate) fn ensure_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(StorageError::io(parent))?;
    }
    Ok(())
}

fn staged(path: &Path, bytes: &[u8]) -> StorageResult<NamedTempFile> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(StorageError::io(dir))?;
    tmp.write_all(bytes).map_err(StorageError::io(tmp.path()))?;
    tmp.as_file().sync_all().map_err(StorageError::io(tmp.path()))?;
    Ok(tmp)
}

/// atomically replace `path` with `bytes`
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let tmp = staged(path, bytes)?;
    tmp.persist(path)
        .map_err(|e| StorageError::io(path)(e.error))?;
    Ok(())
}

/// atomically create `path` with `bytes`, never replacing an existing file
///
/// returns `false` if the file already existed (nothing was written)
pub(crate) fn write_new_atomic(path: &Path, bytes: &[u8]) -> StorageResult<bool> {
    if path.exists() {
        return Ok(false);
    }
    let tmp = staged(path, bytes)?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(StorageError::io(path)(e.error)),
    }
}
