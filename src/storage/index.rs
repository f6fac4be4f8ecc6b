//! Per-database commit index.
//!
//! `meta/<db>/index` holds every commit created for a database, in the
//! order they were made, so history listings don't have to walk the object
//! store. It is a cache: the parent links in the object store are the
//! truth, and [`Index::rebuild`] regenerates the file from them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::commit::{self, Commit, CommitRecord};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::fsutil;
use crate::storage::lock::{MetaLock, MetaRoot, INDEX_FILE};
use crate::storage::objects::ObjectStore;
use crate::storage::refs::BranchStore;
use crate::storage::types::DatabasePath;

/// format version of the index file
pub const INDEX_SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct IndexFile {
    schema_version: u32,
    commits: Vec<CommitRecord>,
}

/// Reads and writes commit indexes under the metadata root.
#[derive(Debug, Clone)]
pub struct Index {
    meta: MetaRoot,
}

impl Index {
    pub fn new(meta: MetaRoot) -> Self {
        Self { meta }
    }

    /// All indexed commits of a database, oldest first.
    ///
    /// A database without an index is `DatabaseNotFound`.
    pub fn read(&self, database: &DatabasePath) -> StorageResult<Vec<Commit>> {
        self.read_or_empty(database)?
            .ok_or_else(|| StorageError::DatabaseNotFound(database.clone()))
    }

    fn read_or_empty(&self, database: &DatabasePath) -> StorageResult<Option<Vec<Commit>>> {
        let path = self.meta.file(database, INDEX_FILE);
        let Some(bytes) = fsutil::read_optional(&path)? else {
            return Ok(None);
        };
        let file: IndexFile = fsutil::decode_versioned(&path, &bytes, INDEX_SCHEMA_VERSION)?;
        file.commits
            .into_iter()
            .map(CommitRecord::into_commit)
            .collect::<StorageResult<Vec<_>>>()
            .map(Some)
    }

    /// Append a commit to a database's index, taking its lock.
    pub fn append(&self, database: &DatabasePath, commit: &Commit) -> StorageResult<()> {
        let lock = self.meta.lock(database)?;
        self.append_locked(&lock, commit)
    }

    /// Append while already holding the database's lock.
    pub(crate) fn append_locked(&self, lock: &MetaLock, commit: &Commit) -> StorageResult<()> {
        let mut commits = self.read_or_empty(lock.database())?.unwrap_or_default();
        commits.push(commit.clone());
        self.write_locked(lock, &commits)?;

        debug!(
            database = %lock.database(),
            commit = %commit.id().short(),
            entries = commits.len(),
            "appended to index"
        );
        Ok(())
    }

    fn write_locked(&self, lock: &MetaLock, commits: &[Commit]) -> StorageResult<()> {
        let file = IndexFile {
            schema_version: INDEX_SCHEMA_VERSION,
            commits: commits.iter().map(CommitRecord::from).collect(),
        };
        let path = self.meta.file(lock.database(), INDEX_FILE);
        fsutil::ensure_parent(&path)?;
        fsutil::write_atomic(&path, &serde_json::to_vec_pretty(&file)?)
    }

    /// Regenerate a database's index from its branch heads.
    ///
    /// Branches are visited in name order and each chain is added oldest
    /// first, skipping commits already added, so parents always precede
    /// their children. A broken chain aborts without touching the index.
    pub fn rebuild(
        &self,
        objects: &ObjectStore,
        branches: &BranchStore,
        database: &DatabasePath,
    ) -> StorageResult<Vec<Commit>> {
        let lock = self.meta.lock(database)?;
        let table = branches.load(database)?;

        let mut seen = HashSet::new();
        let mut commits = Vec::new();
        for (_, head) in &table {
            let mut chain = commit::history(objects, *head)?;
            chain.reverse();
            for c in chain {
                if seen.insert(c.id()) {
                    commits.push(c);
                }
            }
        }

        self.write_locked(&lock, &commits)?;
        info!(database = %database, entries = commits.len(), "rebuilt index");
        Ok(commits)
    }
}
