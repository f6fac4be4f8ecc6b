//!  Branch management.
//!
//!  A branch is a named pointer to the newest commit of one line of
//!  history. Each database has its own table of branches, kept in
//!  `meta/<db>/branches` and rewritten in full on every change:
//! - loading reads the whole table
//! - storing replaces the whole table (last writer wins)
//! - read-modify-write sequences must hold the database's [`MetaLock`]

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::fsutil;
use crate::storage::lock::{MetaLock, MetaRoot, BRANCHES_FILE};
use crate::storage::objects::ObjectStore;
use crate::storage::types::{BranchName, CommitId, DatabasePath};

/// format version of the branches file
pub const BRANCHES_SCHEMA_VERSION: u32 = 1;

/// a single `{name, commit}` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: BranchName,
    pub commit: CommitId,
}

#[derive(Serialize, Deserialize)]
struct BranchesFile {
    schema_version: u32,
    branches: Vec<Branch>,
}

/// The branches of one database. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchTable {
    branches: BTreeMap<BranchName, CommitId>,
}

impl BranchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// the head commit of a branch
    pub fn get(&self, name: &BranchName) -> Option<CommitId> {
        self.branches.get(name).copied()
    }

    /// point a branch at a commit, returning its previous head
    pub fn set(&mut self, name: BranchName, commit: CommitId) -> Option<CommitId> {
        self.branches.insert(name, commit)
    }

    pub fn remove(&mut self, name: &BranchName) -> Option<CommitId> {
        self.branches.remove(name)
    }

    pub fn contains(&self, name: &BranchName) -> bool {
        self.branches.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &BranchName> {
        self.branches.keys()
    }

    /// branches in name order
    pub fn iter(&self) -> btree_map::Iter<'_, BranchName, CommitId> {
        self.branches.iter()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// the table as a list of `{name, commit}` records
    pub fn to_branches(&self) -> Vec<Branch> {
        self.branches
            .iter()
            .map(|(name, commit)| Branch {
                name: name.clone(),
                commit: *commit,
            })
            .collect()
    }

    /// build a table from records, rejecting duplicate names
    pub fn from_branches(branches: Vec<Branch>) -> StorageResult<Self> {
        let mut table = Self::new();
        for branch in branches {
            if table.contains(&branch.name) {
                return Err(StorageError::invalid(
                    "branch table",
                    format!("duplicate branch name '{}'", branch.name),
                ));
            }
            table.set(branch.name, branch.commit);
        }
        Ok(table)
    }
}

impl<'a> IntoIterator for &'a BranchTable {
    type Item = (&'a BranchName, &'a CommitId);
    type IntoIter = btree_map::Iter<'a, BranchName, CommitId>;

    fn into_iter(self) -> Self::IntoIter {
        self.branches.iter()
    }
}

/// Reads and writes branch tables under the metadata root.
#[derive(Debug, Clone)]
pub struct BranchStore {
    meta: MetaRoot,
}

impl BranchStore {
    pub fn new(meta: MetaRoot) -> Self {
        Self { meta }
    }

    /// Load the branch table of a database.
    ///
    /// A database that has never had branches written is `DatabaseNotFound`.
    pub fn load(&self, database: &DatabasePath) -> StorageResult<BranchTable> {
        self.load_or_empty(database)?
            .ok_or_else(|| StorageError::DatabaseNotFound(database.clone()))
    }

    pub(crate) fn load_or_empty(&self, database: &DatabasePath) -> StorageResult<Option<BranchTable>> {
        let path = self.meta.file(database, BRANCHES_FILE);
        let Some(bytes) = fsutil::read_optional(&path)? else {
            return Ok(None);
        };
        let file: BranchesFile = fsutil::decode_versioned(&path, &bytes, BRANCHES_SCHEMA_VERSION)?;
        BranchTable::from_branches(file.branches).map(Some)
    }

    /// Replace the branch table of a database, taking its lock.
    pub fn store(
        &self,
        objects: &ObjectStore,
        database: &DatabasePath,
        table: &BranchTable,
    ) -> StorageResult<()> {
        let lock = self.meta.lock(database)?;
        self.store_locked(objects, &lock, table)
    }

    /// Replace the branch table while already holding the database's lock.
    ///
    /// Every head must be a stored commit; nothing is written otherwise.
    pub(crate) fn store_locked(
        &self,
        objects: &ObjectStore,
        lock: &MetaLock,
        table: &BranchTable,
    ) -> StorageResult<()> {
        for (_, head) in table {
            objects.get_commit(*head)?;
        }

        let file = BranchesFile {
            schema_version: BRANCHES_SCHEMA_VERSION,
            branches: table.to_branches(),
        };
        let path = self.meta.file(lock.database(), BRANCHES_FILE);
        fsutil::ensure_parent(&path)?;
        fsutil::write_atomic(&path, &serde_json::to_vec_pretty(&file)?)?;

        info!(database = %lock.database(), branches = table.len(), "stored branch table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::commit::Commit;
    use crate::storage::lock::DEFAULT_LOCK_TIMEOUT;
    use crate::storage::tree::Tree;
    use crate::storage::types::Signature;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        objects: ObjectStore,
        branches: BranchStore,
        db: DatabasePath,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let objects = ObjectStore::new(dir.path().join("files"));
        let branches = BranchStore::new(MetaRoot::new(dir.path().join("meta"), DEFAULT_LOCK_TIMEOUT));
        Fixture {
            _dir: dir,
            objects,
            branches,
            db: DatabasePath::new("test.sqlite").unwrap(),
        }
    }

    fn commit(objects: &ObjectStore, message: &str) -> CommitId {
        let blob = objects.put_blob(message.as_bytes()).unwrap();
        let tree = Tree::for_database("test.sqlite", blob).unwrap();
        objects.put_tree(&tree).unwrap();
        let commit = Commit::builder()
            .tree(tree.id())
            .author(Signature::new("Alice", "alice@example.com"))
            .message(message)
            .build()
            .unwrap();
        objects.put_commit(&commit).unwrap()
    }

    #[test]
    fn test_table_operations() {
        let id = CommitId::from_hex(&"ab".repeat(32)).unwrap();
        let other = CommitId::from_hex(&"cd".repeat(32)).unwrap();
        let mut table = BranchTable::new();

        assert!(table.is_empty());
        assert_eq!(table.set(BranchName::master(), id), None);
        assert_eq!(table.set(BranchName::master(), other), Some(id));
        assert_eq!(table.get(&BranchName::master()), Some(other));
        assert_eq!(table.len(), 1);
        assert_eq!(table.remove(&BranchName::master()), Some(other));
        assert!(!table.contains(&BranchName::master()));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let id = CommitId::from_hex(&"ab".repeat(32)).unwrap();
        let result = BranchTable::from_branches(vec![
            Branch { name: BranchName::master(), commit: id },
            Branch { name: BranchName::master(), commit: id },
        ]);
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn test_store_then_load_roundtrip() {
        let f = setup();
        let c1 = commit(&f.objects, "one");
        let c2 = commit(&f.objects, "two");

        let mut table = BranchTable::new();
        table.set(BranchName::master(), c1);
        table.set(BranchName::new("staging").unwrap(), c2);

        f.branches.store(&f.objects, &f.db, &table).unwrap();
        assert_eq!(f.branches.load(&f.db).unwrap(), table);

        // last writer wins
        let mut replacement = BranchTable::new();
        replacement.set(BranchName::master(), c2);
        f.branches.store(&f.objects, &f.db, &replacement).unwrap();
        assert_eq!(f.branches.load(&f.db).unwrap(), replacement);
    }

    #[test]
    fn test_load_unknown_database() {
        let f = setup();
        let err = f.branches.load(&f.db).unwrap_err();
        assert!(matches!(err, StorageError::DatabaseNotFound(_)));
    }

    #[test]
    fn test_store_rejects_unknown_head() {
        let f = setup();
        let mut table = BranchTable::new();
        table.set(BranchName::master(), CommitId::from_hex(&"ab".repeat(32)).unwrap());

        let err = f.branches.store(&f.objects, &f.db, &table).unwrap_err();
        assert!(err.is_not_found());
        assert!(f.branches.load_or_empty(&f.db).unwrap().is_none());
    }

    #[test]
    fn test_file_format() {
        let f = setup();
        let c1 = commit(&f.objects, "one");
        let mut table = BranchTable::new();
        table.set(BranchName::master(), c1);
        f.branches.store(&f.objects, &f.db, &table).unwrap();

        let raw = std::fs::read(f._dir.path().join("meta").join("test.sqlite").join("branches")).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["schema_version"], 1);
        assert_eq!(json["branches"][0]["name"], "master");
        assert_eq!(json["branches"][0]["commit"], c1.to_string());
    }
}
