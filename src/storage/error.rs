//! Storage layer error types
//!
//! All errors that can occur during storage operations are defined here
//! We use `thiserror` for ergonomic error definition and better error messages

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::storage::types::{DatabasePath, InvalidNameError, ObjectId};

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// a commit or tree failed validation before any hashing or I/O
    #[error("invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },

    /// invalid database, branch or entry name
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// no object is stored under the hash
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// the branch does not exist in the database's branch table
    #[error("branch not found: {branch} (database {database})")]
    BranchNotFound { database: DatabasePath, branch: String },

    /// no metadata has ever been written for the database
    #[error("database not found: {0}")]
    DatabaseNotFound(DatabasePath),

    /// filesystem level failure, with the path that caused it
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// another process held the database lock for too long
    #[error("timed out after {:?} waiting for lock on {database}", timeout)]
    LockTimeout { database: DatabasePath, timeout: Duration },

    /// stored content does not match the hash it is filed under
    #[error("integrity violation for {id}: {reason}")]
    Integrity { id: ObjectId, reason: String },

    /// the object exists but is of a different kind than requested
    #[error("unexpected object kind for {id}: expected {expected}, found {found}")]
    UnexpectedObjectKind {
        id: ObjectId,
        expected: &'static str,
        found: &'static str,
    },

    /// a persisted record was written by an unknown format version
    #[error("unsupported schema version {found} in {}", path.display())]
    UnsupportedSchema { path: PathBuf, found: u32 },

    /// a parent reference points at a commit that cannot be read
    #[error("broken history: commit {referenced_by} references missing parent {missing}")]
    BrokenHistory { missing: ObjectId, referenced_by: ObjectId },
}

impl StorageError {
    pub(crate) fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        StorageError::Invalid {
            what,
            reason: reason.into(),
        }
    }

    /// wrap an io error with the path it happened on, for use with `map_err`
    pub(crate) fn io(path: impl AsRef<Path>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        move |source| StorageError::Io { path, source }
    }

    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectNotFound(_)
                | StorageError::BranchNotFound { .. }
                | StorageError::DatabaseNotFound(_)
        )
    }

    /// check if this error means stored data can't be trusted
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            StorageError::Integrity { .. }
                | StorageError::UnexpectedObjectKind { .. }
                | StorageError::UnsupportedSchema { .. }
        )
    }

    /// check if this error was raised before touching the disk
    pub fn is_validation(&self) -> bool {
        matches!(self, StorageError::Invalid { .. } | StorageError::InvalidName(_))
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
