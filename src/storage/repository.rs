//!   Store handle.
//!
//!  This is the central component of the storage layer. It owns one storage
//!  root (objects plus per-database metadata) and provides the operations
//!  the rest of the system uses. Nothing here is global: open as many
//!  independent handles, on as many roots, as you like.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::StoreConfig;
use crate::storage::commit::{self, Commit};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::index::Index;
use crate::storage::lock::MetaRoot;
use crate::storage::objects::ObjectStore;
use crate::storage::refs::{BranchStore, BranchTable};
use crate::storage::tree::{TreeBuilder, TreeEntry};
use crate::storage::types::{BranchName, CommitId, DatabasePath, Signature};

/// Everything needed to record a new version of a database file, apart
/// from the bytes themselves.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub author: Signature,
    pub committer: Option<Signature>,
    pub message: String,
    pub branch: BranchName,
    /// explicit parent; defaults to the branch head
    pub parent: Option<CommitId>,
    /// commit time; defaults to now
    pub timestamp: Option<DateTime<Utc>>,
}

impl CommitRequest {
    pub fn new(author: Signature, message: impl Into<String>) -> Self {
        Self {
            author,
            committer: None,
            message: message.into(),
            branch: BranchName::master(),
            parent: None,
            timestamp: None,
        }
    }

    pub fn branch(mut self, branch: BranchName) -> Self {
        self.branch = branch;
        self
    }

    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// The main store handle.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Debug, Clone)]
pub struct Repository {
    inner: Arc<RepositoryInner>,
}

#[derive(Debug)]
struct RepositoryInner {
    config: StoreConfig,
    objects: ObjectStore,
    index: Index,
    branches: BranchStore,
    meta: MetaRoot,
}

impl Repository {
    /// Open a storage root, creating its layout if needed.
    pub fn open(config: StoreConfig) -> StorageResult<Self> {
        let meta = MetaRoot::new(config.meta_dir(), config.lock_timeout);
        let objects = ObjectStore::new(config.objects_dir());

        objects.ensure_initialized()?;
        std::fs::create_dir_all(meta.root()).map_err(StorageError::io(meta.root()))?;

        Ok(Self {
            inner: Arc::new(RepositoryInner {
                index: Index::new(meta.clone()),
                branches: BranchStore::new(meta.clone()),
                meta,
                objects,
                config,
            }),
        })
    }

    /// Open a storage root with default settings.
    pub fn open_path(root: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open(StoreConfig::new(root.as_ref()))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn root(&self) -> &Path {
        &self.inner.config.root
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.inner.objects
    }

    pub fn index(&self) -> &Index {
        &self.inner.index
    }

    pub fn branch_store(&self) -> &BranchStore {
        &self.inner.branches
    }

    // ==================== Commits ====================

    /// Record a new version of a database file.
    ///
    /// The request is validated before anything is written. The rest runs
    /// under the database's lock: blob, tree and commit are stored, the
    /// commit is appended to the index and the branch is moved to it.
    pub fn commit_database(
        &self,
        database: &DatabasePath,
        bytes: &[u8],
        request: CommitRequest,
    ) -> StorageResult<Commit> {
        commit::validate_signatures(&request.author, request.committer.as_ref())?;

        let objects = &self.inner.objects;
        let lock = self.inner.meta.lock(database)?;
        let mut table = self
            .inner
            .branches
            .load_or_empty(database)?
            .unwrap_or_default();

        let parent = request.parent.or_else(|| table.get(&request.branch));

        // keep the parent's other entries (licence etc.) and their order
        let mut tree_builder = match parent {
            Some(parent) => {
                let parent_commit = objects.get_commit(parent)?;
                TreeBuilder::from_tree(&objects.get_tree(parent_commit.tree())?)
            }
            None => TreeBuilder::new(),
        };

        let blob = objects.put_blob(bytes)?;
        tree_builder.upsert(TreeEntry::database(blob, database.file_name()));
        let tree = tree_builder.build()?;
        objects.put_tree(&tree)?;

        let mut builder = Commit::builder()
            .tree(tree.id())
            .maybe_parent(parent)
            .author(request.author)
            .message(request.message);
        if let Some(committer) = request.committer {
            builder = builder.committer(committer);
        }
        if let Some(timestamp) = request.timestamp {
            builder = builder.timestamp(timestamp);
        }
        let commit = builder.build()?;
        objects.put_commit(&commit)?;

        self.inner.index.append_locked(&lock, &commit)?;
        let previous = table.set(request.branch.clone(), commit.id());
        self.inner.branches.store_locked(objects, &lock, &table)?;

        info!(
            database = %database,
            branch = %request.branch,
            commit = %commit.id().short(),
            previous = ?previous.map(|c| c.short()),
            size = bytes.len(),
            "committed database"
        );
        Ok(commit)
    }

    /// Get a commit by ID.
    pub fn get_commit(&self, id: CommitId) -> StorageResult<Commit> {
        self.inner.objects.get_commit(id)
    }

    /// The database file stored in a commit: its name and bytes.
    pub fn snapshot(&self, id: CommitId) -> StorageResult<(String, Vec<u8>)> {
        let commit = self.inner.objects.get_commit(id)?;
        let tree = self.inner.objects.get_tree(commit.tree())?;
        let entry = tree.database_entry().ok_or_else(|| StorageError::Integrity {
            id: tree.id().object_id(),
            reason: "tree has no database entry".to_string(),
        })?;
        let bytes = self.inner.objects.get_blob(entry.sha_sum)?;
        Ok((entry.name.clone(), bytes))
    }

    // ==================== History ====================

    /// Full history of a branch, newest first, following parent links.
    pub fn log(&self, database: &DatabasePath, branch: &BranchName) -> StorageResult<Vec<Commit>> {
        let head = self.head(database, branch)?;
        commit::history(&self.inner.objects, head)
    }

    /// Commits recorded in the index, oldest first.
    pub fn read_index(&self, database: &DatabasePath) -> StorageResult<Vec<Commit>> {
        self.inner.index.read(database)
    }

    /// Regenerate the index from the branch heads.
    pub fn rebuild_index(&self, database: &DatabasePath) -> StorageResult<Vec<Commit>> {
        self.inner
            .index
            .rebuild(&self.inner.objects, &self.inner.branches, database)
    }

    // ==================== Branches ====================

    /// All branches of a database.
    pub fn branches(&self, database: &DatabasePath) -> StorageResult<BranchTable> {
        self.inner.branches.load(database)
    }

    /// Get the head commit of a branch.
    pub fn head(&self, database: &DatabasePath, branch: &BranchName) -> StorageResult<CommitId> {
        self.branches(database)?
            .get(branch)
            .ok_or_else(|| StorageError::BranchNotFound {
                database: database.clone(),
                branch: branch.to_string(),
            })
    }

    /// Point a branch at an existing commit, creating it if needed.
    ///
    /// Returns the previous head, if the branch existed.
    pub fn set_branch(
        &self,
        database: &DatabasePath,
        branch: &BranchName,
        target: CommitId,
    ) -> StorageResult<Option<CommitId>> {
        let lock = self.inner.meta.lock(database)?;
        let mut table = self.inner.branches.load(database)?;
        let previous = table.set(branch.clone(), target);
        self.inner
            .branches
            .store_locked(&self.inner.objects, &lock, &table)?;

        info!(database = %database, branch = %branch, commit = %target.short(), "moved branch");
        Ok(previous)
    }

    /// Remove a branch. The commits it pointed at stay in the store.
    pub fn delete_branch(&self, database: &DatabasePath, branch: &BranchName) -> StorageResult<CommitId> {
        let lock = self.inner.meta.lock(database)?;
        let mut table = self.inner.branches.load(database)?;
        let head = table
            .remove(branch)
            .ok_or_else(|| StorageError::BranchNotFound {
                database: database.clone(),
                branch: branch.to_string(),
            })?;
        self.inner
            .branches
            .store_locked(&self.inner.objects, &lock, &table)?;

        info!(database = %database, branch = %branch, "deleted branch");
        Ok(head)
    }
}
