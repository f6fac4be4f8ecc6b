//! Content-addressed object storage.
//!
//! Every blob, tree and commit lives in one flat directory as
//! `files/<sha256>`. Blobs are stored as their raw bytes; trees and commits
//! as pretty JSON records tagged with a `kind` and a `schema_version`.
//!
//! Objects are write-once. Storing something that already exists is a
//! no-op only after the existing file has been checked against the new
//! content; a mismatch is reported as an integrity violation and the file
//! on disk is left alone. Reads re-verify identity the same way, so a
//! corrupted file is never handed back as valid data.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::commit::{Commit, CommitRecord};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::fsutil;
use crate::storage::tree::{Tree, TreeEntry};
use crate::storage::types::{BlobId, CommitId, ObjectId, TreeId};

/// format version written into every tree and commit record
pub const OBJECT_SCHEMA_VERSION: u32 = 1;

/// on-disk envelope for trees and commits
#[derive(Serialize, Deserialize)]
struct ObjectFile {
    schema_version: u32,
    #[serde(flatten)]
    record: ObjectRecord,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ObjectRecord {
    Tree(TreeRecord),
    Commit(CommitRecord),
}

#[derive(Serialize, Deserialize)]
struct TreeRecord {
    id: TreeId,
    entries: Vec<TreeEntry>,
}

/// just enough of a record to decide how to read the rest
#[derive(Deserialize)]
struct RecordHeader {
    schema_version: u32,
    kind: String,
}

/// what a stored file turned out to be
enum Stored {
    Blob(Vec<u8>),
    Record(RecordHeader, Vec<u8>),
}

/// Durable, deduplicating store for blobs, trees and commits.
#[derive(Debug)]
pub struct ObjectStore {
    dir: PathBuf,
    initialized: Mutex<bool>,
}

impl ObjectStore {
    /// create a handle for the object directory; nothing is touched until first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            initialized: Mutex::new(false),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// create the object directory if it isn't there yet
    pub fn ensure_initialized(&self) -> StorageResult<()> {
        let mut ready = self.initialized.lock();
        if !*ready {
            fs::create_dir_all(&self.dir).map_err(StorageError::io(&self.dir))?;
            *ready = true;
        }
        Ok(())
    }

    fn object_path(&self, id: ObjectId) -> PathBuf {
        self.dir.join(id.to_hex())
    }

    /// check whether anything is stored under the hash
    pub fn contains(&self, id: ObjectId) -> bool {
        self.object_path(id).is_file()
    }

    /// number of stored objects of any kind
    pub fn object_count(&self) -> StorageResult<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::io(&self.dir)(e)),
        };

        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(StorageError::io(&self.dir))?;
            let name = entry.file_name();
            if name.to_str().is_some_and(|n| ObjectId::from_hex(n).is_ok()) {
                count += 1;
            }
        }
        Ok(count)
    }

    // ==================== Blobs ====================

    /// store raw bytes, returning their hash
    pub fn put_blob(&self, bytes: &[u8]) -> StorageResult<BlobId> {
        let id = BlobId::for_content(bytes);
        self.ensure_initialized()?;

        let path = self.object_path(id.object_id());
        if fsutil::write_new_atomic(&path, bytes)? {
            debug!(blob = %id.object_id().short(), size = bytes.len(), "stored blob");
            return Ok(id);
        }

        let existing = fs::read(&path).map_err(StorageError::io(&path))?;
        if existing != bytes {
            warn!(blob = %id, "existing blob differs from new content");
            return Err(StorageError::Integrity {
                id: id.object_id(),
                reason: format!(
                    "stored object ({} bytes) differs from new content ({} bytes)",
                    existing.len(),
                    bytes.len()
                ),
            });
        }

        debug!(blob = %id.object_id().short(), "blob already stored");
        Ok(id)
    }

    /// read a blob back, verifying its hash
    pub fn get_blob(&self, id: BlobId) -> StorageResult<Vec<u8>> {
        let oid = id.object_id();
        let bytes = self.read_object(oid)?;

        if ObjectId::digest(&bytes) == oid {
            return Ok(bytes);
        }
        match classify(bytes) {
            Stored::Record(header, _) => Err(StorageError::UnexpectedObjectKind {
                id: oid,
                expected: "blob",
                found: kind_name(&header.kind),
            }),
            Stored::Blob(_) => Err(corrupt(oid, "content does not match its hash")),
        }
    }

    // ==================== Trees ====================

    /// store a tree; every entry must name a stored blob
    pub fn put_tree(&self, tree: &Tree) -> StorageResult<TreeId> {
        for entry in tree.entries() {
            self.get_blob(entry.sha_sum)?;
        }

        let record = ObjectRecord::Tree(TreeRecord {
            id: tree.id(),
            entries: tree.entries().to_vec(),
        });
        self.put_record(tree.id().object_id(), record, "tree")?;

        // an existing file must decode to the same tree
        let stored = self.get_tree(tree.id())?;
        if stored != *tree {
            return Err(corrupt(tree.id().object_id(), "stored tree differs from new tree"));
        }
        Ok(tree.id())
    }

    /// read a tree, verifying its ID against its entries
    pub fn get_tree(&self, id: TreeId) -> StorageResult<Tree> {
        let oid = id.object_id();
        match self.read_record(oid, "tree")? {
            ObjectRecord::Tree(record) => {
                if record.id != id {
                    return Err(corrupt(oid, &format!("record claims id {}", record.id)));
                }
                let tree = Tree::new(record.entries).map_err(|e| corrupt(oid, &e.to_string()))?;
                if tree.id() != id {
                    return Err(corrupt(oid, &format!("entries hash to {}", tree.id())));
                }
                Ok(tree)
            }
            ObjectRecord::Commit(_) => Err(StorageError::UnexpectedObjectKind {
                id: oid,
                expected: "tree",
                found: "commit",
            }),
        }
    }

    // ==================== Commits ====================

    /// store a commit; its tree and parent must already be stored as a tree and a commit
    pub fn put_commit(&self, commit: &Commit) -> StorageResult<CommitId> {
        self.get_tree(commit.tree())?;
        if let Some(parent) = commit.parent() {
            self.get_commit(parent)?;
        }

        let record = ObjectRecord::Commit(CommitRecord::from(commit));
        self.put_record(commit.id().object_id(), record, "commit")?;

        let stored = self.get_commit(commit.id())?;
        if stored != *commit {
            return Err(corrupt(commit.id().object_id(), "stored commit differs from new commit"));
        }
        Ok(commit.id())
    }

    /// read a commit, verifying its ID against its fields
    pub fn get_commit(&self, id: CommitId) -> StorageResult<Commit> {
        let oid = id.object_id();
        match self.read_record(oid, "commit")? {
            ObjectRecord::Commit(record) => {
                if record.claimed_id() != id {
                    return Err(corrupt(oid, &format!("record claims id {}", record.claimed_id())));
                }
                record.into_commit()
            }
            ObjectRecord::Tree(_) => Err(StorageError::UnexpectedObjectKind {
                id: oid,
                expected: "commit",
                found: "tree",
            }),
        }
    }

    // ==================== Internals ====================

    fn read_object(&self, id: ObjectId) -> StorageResult<Vec<u8>> {
        fsutil::read_optional(&self.object_path(id))?.ok_or(StorageError::ObjectNotFound(id))
    }

    fn put_record(&self, id: ObjectId, record: ObjectRecord, kind: &str) -> StorageResult<()> {
        self.ensure_initialized()?;
        let file = ObjectFile {
            schema_version: OBJECT_SCHEMA_VERSION,
            record,
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        if fsutil::write_new_atomic(&self.object_path(id), &bytes)? {
            debug!(object = %id.short(), kind, "stored object");
        } else {
            debug!(object = %id.short(), kind, "object already stored");
        }
        Ok(())
    }

    fn read_record(&self, id: ObjectId, expected: &'static str) -> StorageResult<ObjectRecord> {
        let path = self.object_path(id);
        let (header, bytes) = match classify(self.read_object(id)?) {
            Stored::Record(header, bytes) => (header, bytes),
            Stored::Blob(bytes) => {
                if ObjectId::digest(&bytes) == id {
                    return Err(StorageError::UnexpectedObjectKind {
                        id,
                        expected,
                        found: "blob",
                    });
                }
                return Err(corrupt(id, "object is neither a valid record nor a blob"));
            }
        };

        if header.schema_version != OBJECT_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchema {
                path,
                found: header.schema_version,
            });
        }

        let file: ObjectFile =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(id, &e.to_string()))?;
        Ok(file.record)
    }
}

/// decide whether stored bytes are a structured record or a raw blob
fn classify(bytes: Vec<u8>) -> Stored {
    match serde_json::from_slice::<RecordHeader>(&bytes) {
        Ok(header) => Stored::Record(header, bytes),
        Err(_) => Stored::Blob(bytes),
    }
}

fn kind_name(kind: &str) -> &'static str {
    match kind {
        "tree" => "tree",
        "commit" => "commit",
        _ => "unknown record",
    }
}

fn corrupt(id: ObjectId, reason: &str) -> StorageError {
    warn!(object = %id, reason, "integrity check failed");
    StorageError::Integrity {
        id,
        reason: reason.to_string(),
    }
}
