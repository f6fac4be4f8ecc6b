//! Per-database metadata lock.
//!
//! The index and branch files of a database are rewritten as a whole, so
//! two processes updating them at once would lose one of the updates. Every
//! read-modify-write of those files happens while holding an exclusive OS
//! advisory lock on `meta/<db>/lock`.
//!
//! The lock is released when the guard is dropped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::fsutil;
use crate::storage::types::DatabasePath;

/// Default timeout for lock acquisition (10 seconds).
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Polling interval when waiting for the lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) const LOCK_FILE: &str = "lock";
pub(crate) const INDEX_FILE: &str = "index";
pub(crate) const BRANCHES_FILE: &str = "branches";

/// Files kept directly inside `meta/<db>/`. A nested database path can't
/// use these names below its first segment, or its directory would land
/// on another database's file.
pub(crate) const METADATA_FILES: [&str; 3] = [LOCK_FILE, INDEX_FILE, BRANCHES_FILE];

/// The `meta/` directory: one subdirectory per tracked database.
#[derive(Debug, Clone)]
pub struct MetaRoot {
    root: PathBuf,
    lock_timeout: Duration,
}

impl MetaRoot {
    pub fn new(root: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            lock_timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `meta/<db>/`
    pub fn database_dir(&self, database: &DatabasePath) -> PathBuf {
        self.root.join(database.to_relative_path())
    }

    /// path of a metadata file belonging to a database
    pub fn file(&self, database: &DatabasePath, name: &str) -> PathBuf {
        self.database_dir(database).join(name)
    }

    /// take the exclusive lock for a database, waiting up to the configured timeout
    pub fn lock(&self, database: &DatabasePath) -> StorageResult<MetaLock> {
        MetaLock::acquire(&self.file(database, LOCK_FILE), database, self.lock_timeout)
    }
}

/// An exclusive lock over one database's metadata.
#[derive(Debug)]
pub struct MetaLock {
    path: PathBuf,
    file: Option<File>,
    database: DatabasePath,
}

impl MetaLock {
    /// Acquire the lock, polling until `timeout` expires.
    ///
    /// # Errors
    ///
    /// - [`StorageError::LockTimeout`] if another holder keeps the lock too long
    /// - [`StorageError::Io`] if the lock file can't be created or locked
    pub fn acquire(path: &Path, database: &DatabasePath, timeout: Duration) -> StorageResult<Self> {
        fsutil::ensure_parent(path)?;
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(lock) = Self::try_acquire(path, database)? {
                debug!(database = %database, "acquired metadata lock");
                return Ok(lock);
            }
            if Instant::now() >= deadline {
                return Err(StorageError::LockTimeout {
                    database: database.clone(),
                    timeout,
                });
            }
            thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    /// Try to take the lock without waiting; `Ok(None)` if someone else holds it.
    pub fn try_acquire(path: &Path, database: &DatabasePath) -> StorageResult<Option<Self>> {
        fsutil::ensure_parent(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(StorageError::io(path))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                path: path.to_path_buf(),
                file: Some(file),
                database: database.clone(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(StorageError::io(path)(e)),
        }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// the database this lock guards
    pub fn database(&self) -> &DatabasePath {
        &self.database
    }

    /// Release the lock before the guard goes out of scope.
    pub fn release(&mut self) -> StorageResult<()> {
        if let Some(file) = self.file.take() {
            FileExt::unlock(&file).map_err(StorageError::io(&self.path))?;
        }
        Ok(())
    }
}

impl Drop for MetaLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn db() -> DatabasePath {
        DatabasePath::new("test.sqlite").unwrap()
    }

    #[test]
    fn test_acquire_creates_lock_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta").join("test.sqlite").join("lock");

        let lock = MetaLock::acquire(&path, &db(), DEFAULT_LOCK_TIMEOUT).unwrap();
        assert!(lock.is_held());
        assert!(path.is_file());
        assert_eq!(lock.database(), &db());
    }

    #[test]
    fn test_lock_excludes_second_holder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");

        let first = MetaLock::acquire(&path, &db(), DEFAULT_LOCK_TIMEOUT).unwrap();
        assert!(MetaLock::try_acquire(&path, &db()).unwrap().is_none());

        let err = MetaLock::acquire(&path, &db(), Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, StorageError::LockTimeout { .. }));

        drop(first);
        assert!(MetaLock::try_acquire(&path, &db()).unwrap().is_some());
    }

    #[test]
    fn test_explicit_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");

        let mut lock = MetaLock::acquire(&path, &db(), DEFAULT_LOCK_TIMEOUT).unwrap();
        lock.release().unwrap();
        assert!(!lock.is_held());
        assert!(MetaLock::try_acquire(&path, &db()).unwrap().is_some());
    }

    #[test]
    fn test_meta_root_lock_is_per_database() {
        let dir = TempDir::new().unwrap();
        let meta = MetaRoot::new(dir.path(), Duration::from_millis(100));
        let other = DatabasePath::new("team/other.db").unwrap();

        let _held = meta.lock(&db()).unwrap();
        // a different database is not blocked
        let second = meta.lock(&other).unwrap();
        assert_eq!(second.path(), dir.path().join("team").join("other.db").join("lock"));
        // the same database is
        assert!(meta.lock(&db()).is_err());
    }

    #[test]
    fn test_default_timeout_is_reasonable() {
        assert!(DEFAULT_LOCK_TIMEOUT >= Duration::from_secs(5));
        assert!(LOCK_POLL_INTERVAL <= Duration::from_millis(500));
    }
}
