//! storage layer for dio
//!
//! this module provides content-addressed version history for database
//! files. Callers hand it the bytes of a database and get back commits;
//! nothing above this layer touches the storage root directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Repository                            │
//! │   (High-level API: commit_database, log, branches, index)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   objects   │       │    index    │       │    refs     │
//!  │ (files/<id>)│       │ (meta/<db>) │       │ (meta/<db>) │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         │                     └──────────┬──────────┘
//!         ▼                                ▼
//!  ┌─────────────┐                  ┌─────────────┐
//!  │ hash / tree │                  │    lock     │
//!  │  / commit   │                  │ (per-db fs  │
//!  │ (identity)  │                  │    lock)    │
//!  └─────────────┘                  └─────────────┘
//!  ```
//!
//! # Usage
//!
//! ```ignore
//! use dio::storage::{BranchName, CommitRequest, DatabasePath, Repository, Signature};
//!
//! // Open (creating the layout if needed)
//! let repo = Repository::open_path("./store")?;
//!
//! // Record a version of a database file
//! let db = DatabasePath::new("sales/q1.sqlite")?;
//! let author = Signature::new("Alice", "alice@example.com");
//! let commit = repo.commit_database(&db, &bytes, CommitRequest::new(author, "initial load"))?;
//!
//! // Walk its history, newest first
//! for c in repo.log(&db, &BranchName::master())? {
//!     println!("{}", c.display_text());
//! }
//!
//! // Get the bytes back
//! let (name, bytes) = repo.snapshot(commit.id())?;
//! ```

mod commit;
mod error;
mod fsutil;
mod hash;
mod index;
mod lock;
mod objects;
mod refs;
mod repository;
mod tree;
mod types;

// Re-export public API
pub use commit::{history, Commit, CommitBuilder, History};
pub use error::{StorageError, StorageResult};
pub use hash::{commit_payload, format_timestamp, hash_commit, hash_tree, tree_payload, TIMESTAMP_FORMAT};
pub use index::{Index, INDEX_SCHEMA_VERSION};
pub use lock::{MetaLock, MetaRoot, DEFAULT_LOCK_TIMEOUT};
pub use objects::{ObjectStore, OBJECT_SCHEMA_VERSION};
pub use refs::{Branch, BranchStore, BranchTable, BRANCHES_SCHEMA_VERSION};
pub use repository::{CommitRequest, Repository};
pub use tree::{EntryType, Tree, TreeBuilder, TreeEntry};
pub use types::{
    BlobId, BranchName, CommitId, DatabasePath, InvalidNameError, ObjectId, Signature, TreeId,
};
