//! dio - version history for database files
//!
//! This crate keeps the full history of binary database files in a local,
//! content-addressed object store. Every version is a commit, identical
//! contents are stored once, and each database has its own branches and a
//! commit index for fast listing.
//!
//! Commit and tree IDs are SHA-256 digests over a fixed text layout, so an
//! independent implementation of the same layout computes the same IDs.
//!
//! # Example
//!
//! ```no_run
//! use dio::config::StoreConfig;
//! use dio::storage::{CommitRequest, DatabasePath, Repository, Signature};
//!
//! let repo = Repository::open(StoreConfig::new("./store")).unwrap();
//! let db = DatabasePath::new("inventory.sqlite").unwrap();
//! let author = Signature::new("Alice", "alice@example.com");
//! let bytes = std::fs::read("inventory.sqlite").unwrap();
//! repo.commit_database(&db, &bytes, CommitRequest::new(author, "nightly snapshot")).unwrap();
//! ```

pub mod config;
pub mod storage;
