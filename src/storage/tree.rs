//! Tree operations.
//!
//! A tree describes the state of one database at one point in history: an
//! ordered list of named blob references. Normally that is a single `db`
//! entry holding the database file, optionally followed by a licence.
//!
//! Entry order is part of the tree's identity. Nothing in this module sorts
//! entries; [`TreeBuilder`] replaces entries in place so that updating a
//! file keeps its position.

use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::hash;
use crate::storage::types::{BlobId, TreeId};

/// the kind of object a tree entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// a database file
    #[serde(rename = "db")]
    Database,
    /// a licence text attached to the database
    #[serde(rename = "licence")]
    Licence,
}

impl EntryType {
    /// the bytes fed into the tree hash
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Database => "db",
            EntryType::Licence => "licence",
        }
    }
}

/// one named reference inside a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub entry_type: EntryType,
    pub sha_sum: BlobId,
    pub name: String,
}

impl TreeEntry {
    pub fn new(entry_type: EntryType, sha_sum: BlobId, name: impl Into<String>) -> Self {
        Self {
            entry_type,
            sha_sum,
            name: name.into(),
        }
    }

    pub fn database(sha_sum: BlobId, name: impl Into<String>) -> Self {
        Self::new(EntryType::Database, sha_sum, name)
    }
}

/// An immutable, validated tree with its computed ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    id: TreeId,
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// validate the entries and compute the tree ID
    pub fn new(entries: Vec<TreeEntry>) -> StorageResult<Self> {
        validate_entries(&entries)?;
        let id = hash::hash_tree(&entries);
        Ok(Self { id, entries })
    }

    /// a tree holding a single database file
    pub fn for_database(name: impl Into<String>, blob: BlobId) -> StorageResult<Self> {
        Self::new(vec![TreeEntry::database(blob, name)])
    }

    pub fn id(&self) -> TreeId {
        self.id
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// look up an entry by name
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// the first database entry, which is what a snapshot restores
    pub fn database_entry(&self) -> Option<&TreeEntry> {
        self.entries
            .iter()
            .find(|e| e.entry_type == EntryType::Database)
    }
}

/// reject entry lists that can't be hashed unambiguously
fn validate_entries(entries: &[TreeEntry]) -> StorageResult<()> {
    if entries.is_empty() {
        return Err(StorageError::invalid("tree", "a tree needs at least one entry"));
    }

    for (i, entry) in entries.iter().enumerate() {
        if entry.name.is_empty() {
            return Err(StorageError::invalid(
                "tree",
                format!("entry {} has an empty name", i),
            ));
        }
        if entry.name.contains(['\0', '\n']) {
            return Err(StorageError::invalid(
                "tree",
                format!("entry name {:?} contains a NUL or newline", entry.name),
            ));
        }
        if entries[..i].iter().any(|prev| prev.name == entry.name) {
            return Err(StorageError::invalid(
                "tree",
                format!("duplicate entry name {:?}", entry.name),
            ));
        }
    }

    Ok(())
}

/// Accumulates changes to a tree and produces a new one.
///
/// Starting from an existing tree keeps its entry order; replacing an
/// entry keeps its position, new entries go at the end.
#[derive(Debug, Default, Clone)]
pub struct TreeBuilder {
    entries: Vec<TreeEntry>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// start from the entries of an existing tree
    pub fn from_tree(tree: &Tree) -> Self {
        Self {
            entries: tree.entries.clone(),
        }
    }

    /// insert an entry, or replace the one with the same name in place
    pub fn upsert(&mut self, entry: TreeEntry) -> &mut Self {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self
    }

    /// remove an entry by name; returns whether it existed
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        self.entries.len() != before
    }

    pub fn build(self) -> StorageResult<Tree> {
        Tree::new(self.entries)
    }
}
