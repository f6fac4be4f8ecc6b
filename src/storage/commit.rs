//!  Commit creation and history traversal
//!
//!  commits are the atomic units of change. In dio:
//! - each upload of a database file creates one commit
//! - a commit points at the tree holding the file and at most one parent
//! - history is never stored as a list; it is rebuilt by following parents
//!
//! this module handles commit construction, validation and history walking

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::hash;
use crate::storage::objects::ObjectStore;
use crate::storage::types::{CommitId, ObjectId, Signature, TreeId};

/// A validated commit with its computed ID.
///
/// There is no way to set the ID: it is derived from the other fields when
/// the commit is built and re-checked whenever a commit is read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    id: CommitId,
    tree: TreeId,
    parent: Option<CommitId>,
    author: Signature,
    committer: Option<Signature>,
    timestamp: DateTime<Utc>,
    message: String,
}

impl Commit {
    pub fn builder() -> CommitBuilder {
        CommitBuilder::new()
    }

    pub fn id(&self) -> CommitId {
        self.id
    }

    pub fn tree(&self) -> TreeId {
        self.tree
    }

    pub fn parent(&self) -> Option<CommitId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn author(&self) -> &Signature {
        &self.author
    }

    /// the committer, falling back to the author when none was set
    pub fn committer(&self) -> &Signature {
        self.committer.as_ref().unwrap_or(&self.author)
    }

    /// the committer only if one was set explicitly (this is what gets hashed)
    pub fn explicit_committer(&self) -> Option<&Signature> {
        self.committer.as_ref()
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// the text shown for this commit in history listings
    pub fn display_text(&self) -> String {
        let mut text = format!("commit {}\n", self.id);
        text.push_str(&format!(
            "Author: {} <{}>\n",
            self.author.name, self.author.email
        ));
        text.push_str(&format!("Date: {}\n\n", hash::format_timestamp(&self.timestamp)));
        for line in self.message.lines() {
            text.push_str(&format!("    {}\n", line));
        }
        text
    }
}

/// builder for creating commits with a fluent interface
#[derive(Debug, Default, Clone)]
pub struct CommitBuilder {
    tree: Option<TreeId>,
    parent: Option<CommitId>,
    author: Option<Signature>,
    committer: Option<Signature>,
    timestamp: Option<DateTime<Utc>>,
    message: Option<String>,
}

impl CommitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// set the tree for this commit
    pub fn tree(mut self, tree: TreeId) -> Self {
        self.tree = Some(tree);
        self
    }

    /// set the parent commit
    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// set or clear the parent commit
    pub fn maybe_parent(mut self, parent: Option<CommitId>) -> Self {
        self.parent = parent;
        self
    }

    pub fn author(mut self, author: Signature) -> Self {
        self.author = Some(author);
        self
    }

    /// set a committer distinct from the author
    pub fn committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    /// set the commit time; sub-second precision is dropped
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// set the commit message (an empty message is allowed, a missing one is not)
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// validate the fields and compute the commit ID
    pub fn build(self) -> StorageResult<Commit> {
        let tree = self
            .tree
            .ok_or_else(|| StorageError::invalid("commit", "a tree is required"))?;
        let author = self
            .author
            .ok_or_else(|| StorageError::invalid("commit", "an author is required"))?;
        let message = self
            .message
            .ok_or_else(|| StorageError::invalid("commit", "a message is required"))?;

        validate_signatures(&author, self.committer.as_ref())?;

        let timestamp = self.timestamp.unwrap_or_else(Utc::now).trunc_subsecs(0);

        let payload = hash::commit_payload(
            tree,
            self.parent,
            &author,
            self.committer.as_ref(),
            &timestamp,
            &message,
        );

        Ok(Commit {
            id: CommitId::new(ObjectId::digest(&payload)),
            tree,
            parent: self.parent,
            author,
            committer: self.committer,
            timestamp,
            message,
        })
    }
}

/// check the author and committer of a commit
pub(crate) fn validate_signatures(
    author: &Signature,
    committer: Option<&Signature>,
) -> StorageResult<()> {
    author
        .validate("author")
        .map_err(|reason| StorageError::invalid("commit", reason))?;
    if let Some(committer) = committer {
        committer
            .validate("committer")
            .map_err(|reason| StorageError::invalid("commit", reason))?;
    }
    Ok(())
}

/// serialized form of a commit, used in object files and in the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CommitRecord {
    id: CommitId,
    tree: TreeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<CommitId>,
    author_name: String,
    author_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    committer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    committer_email: Option<String>,
    timestamp: DateTime<Utc>,
    message: String,
}

impl CommitRecord {
    /// the ID the record claims to have
    pub(crate) fn claimed_id(&self) -> CommitId {
        self.id
    }

    /// rebuild the commit, checking that the recomputed ID matches
    pub(crate) fn into_commit(self) -> StorageResult<Commit> {
        let committer = match (self.committer_name, self.committer_email) {
            (Some(name), Some(email)) => Some(Signature::new(name, email)),
            (None, None) => None,
            _ => {
                return Err(StorageError::Integrity {
                    id: self.id.object_id(),
                    reason: "committer name and email must be set together".to_string(),
                })
            }
        };

        let commit = Commit {
            id: self.id,
            tree: self.tree,
            parent: self.parent,
            author: Signature::new(self.author_name, self.author_email),
            committer,
            timestamp: self.timestamp,
            message: self.message,
        };

        let actual = hash::hash_commit(&commit);
        if actual != commit.id {
            return Err(StorageError::Integrity {
                id: commit.id.object_id(),
                reason: format!("commit content hashes to {}", actual),
            });
        }
        Ok(commit)
    }
}

impl From<&Commit> for CommitRecord {
    fn from(commit: &Commit) -> Self {
        Self {
            id: commit.id,
            tree: commit.tree,
            parent: commit.parent,
            author_name: commit.author.name.clone(),
            author_email: commit.author.email.clone(),
            committer_name: commit.committer.as_ref().map(|c| c.name.clone()),
            committer_email: commit.committer.as_ref().map(|c| c.email.clone()),
            timestamp: commit.timestamp,
            message: commit.message.clone(),
        }
    }
}

/// Walks parent links from a starting commit, newest first.
///
/// Yields an error and stops if a commit can't be read. A missing parent
/// is reported as [`StorageError::BrokenHistory`] rather than ending the
/// walk early, so callers never mistake a damaged chain for a short one.
pub struct History<'a> {
    objects: &'a ObjectStore,
    next: Option<CommitId>,
    child: Option<CommitId>,
}

impl<'a> History<'a> {
    pub fn new(objects: &'a ObjectStore, start: CommitId) -> Self {
        Self {
            objects,
            next: Some(start),
            child: None,
        }
    }
}

impl Iterator for History<'_> {
    type Item = StorageResult<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;

        match self.objects.get_commit(id) {
            Ok(commit) => {
                self.child = Some(commit.id());
                self.next = commit.parent();
                Some(Ok(commit))
            }
            Err(StorageError::ObjectNotFound(missing)) => match self.child {
                Some(child) => Some(Err(StorageError::BrokenHistory {
                    missing,
                    referenced_by: child.object_id(),
                })),
                None => Some(Err(StorageError::ObjectNotFound(missing))),
            },
            Err(e) => Some(Err(e)),
        }
    }
}

/// collect the full history of a commit, newest first
pub fn history(objects: &ObjectStore, start: CommitId) -> StorageResult<Vec<Commit>> {
    History::new(objects, start).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    use crate::storage::tree::Tree;
    use crate::storage::types::BlobId;

    fn alice() -> Signature {
        Signature::new("Alice", "alice@example.com")
    }

    fn april_12() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 4, 12, 10, 30, 0).unwrap()
    }

    fn t1() -> TreeId {
        Tree::for_database("test.sqlite", BlobId::for_content(b"abc"))
            .unwrap()
            .id()
    }

    fn root_commit() -> Commit {
        Commit::builder()
            .tree(t1())
            .author(alice())
            .timestamp(april_12())
            .message("init")
            .build()
            .unwrap()
    }

    fn setup_store() -> (TempDir, ObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path().join("files"));
        (dir, store)
    }

    #[test]
    fn test_root_commit_id_is_pinned() {
        let commit = root_commit();
        assert_eq!(
            commit.id().to_string(),
            "3336127467bcaa5c1829b7dba5845c33d6e215aeb2f68594141a788d522de012"
        );
        assert!(commit.is_root());
        assert_eq!(hash::hash_commit(&commit), commit.id());
        // identical fields, identical ID
        assert_eq!(root_commit().id(), commit.id());
    }

    #[test]
    fn test_child_commit_id_is_pinned() {
        let t2 = Tree::for_database("test.sqlite", BlobId::for_content(b"abcd"))
            .unwrap()
            .id();
        let child = Commit::builder()
            .tree(t2)
            .parent(root_commit().id())
            .author(alice())
            .timestamp(Utc.with_ymd_and_hms(2017, 4, 13, 9, 5, 7).unwrap())
            .message("update")
            .build()
            .unwrap();

        assert_eq!(
            child.id().to_string(),
            "8e0a88f4198f4c1c95c3aec529b3185be64cffc462e8bcc0100a391a15b25fd8"
        );
        assert_ne!(child.id(), root_commit().id());
    }

    #[test]
    fn test_committer_defaults_to_author() {
        let commit = root_commit();
        assert_eq!(commit.committer(), &alice());
        assert!(commit.explicit_committer().is_none());

        let bob = Signature::new("Bob", "bob@example.com");
        let with_committer = Commit::builder()
            .tree(t1())
            .author(alice())
            .committer(bob.clone())
            .timestamp(april_12())
            .message("init")
            .build()
            .unwrap();
        assert_eq!(with_committer.committer(), &bob);
        assert_eq!(
            with_committer.id().to_string(),
            "348fde837dbd8932b0b8f9f71e93035ffc52884477a1a569d08c2d32748c19fa"
        );
    }

    #[test]
    fn test_subsecond_precision_is_dropped() {
        let precise = april_12() + chrono::Duration::milliseconds(250);
        let commit = Commit::builder()
            .tree(t1())
            .author(alice())
            .timestamp(precise)
            .message("init")
            .build()
            .unwrap();
        assert_eq!(commit.timestamp(), &april_12());
        assert_eq!(commit.id(), root_commit().id());
    }

    #[test]
    fn test_validation_rejects_missing_fields() {
        let missing_message = Commit::builder().tree(t1()).author(alice()).build();
        assert!(missing_message.unwrap_err().is_validation());

        let missing_tree = Commit::builder().author(alice()).message("x").build();
        assert!(missing_tree.unwrap_err().is_validation());

        let missing_author = Commit::builder().tree(t1()).message("x").build();
        assert!(missing_author.unwrap_err().is_validation());

        let missing_email = Commit::builder()
            .tree(t1())
            .author(Signature::new("Alice", ""))
            .message("x")
            .build();
        assert!(missing_email.unwrap_err().is_validation());

        let empty_message = Commit::builder().tree(t1()).author(alice()).message("").build();
        assert!(empty_message.is_ok());
    }

    #[test]
    fn test_message_and_names_are_hashed_verbatim() {
        let commit = Commit::builder()
            .tree(t1())
            .author(Signature::new("Alice <ops>", "alice@example.com"))
            .timestamp(april_12())
            .message("first\0second")
            .build()
            .unwrap();

        let payload = hash::commit_payload(
            commit.tree(),
            None,
            commit.author(),
            None,
            commit.timestamp(),
            commit.message(),
        );
        assert!(payload.ends_with(b"\n\nfirst\0second\0"));
        assert_eq!(commit.id().object_id(), ObjectId::digest(&payload));

        let json = serde_json::to_string(&CommitRecord::from(&commit)).unwrap();
        let back: CommitRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_commit().unwrap(), commit);
    }

    #[test]
    fn test_line_break_in_signature_is_rejected() {
        let result = Commit::builder()
            .tree(t1())
            .author(Signature::new("Alice\ncommitter Mallory", "alice@example.com"))
            .message("x")
            .build();
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn test_record_roundtrip_verifies_id() {
        let commit = root_commit();
        let record = CommitRecord::from(&commit);
        assert_eq!(record.claimed_id(), commit.id());
        assert_eq!(record.into_commit().unwrap(), commit);
    }

    #[test]
    fn test_tampered_record_is_rejected() {
        let mut record = CommitRecord::from(&root_commit());
        record.message = "tampered".to_string();
        let err = record.into_commit().unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_display_text() {
        let commit = Commit::builder()
            .tree(t1())
            .author(alice())
            .timestamp(april_12())
            .message("first line\nsecond line")
            .build()
            .unwrap();
        let text = commit.display_text();

        assert!(text.starts_with(&format!("commit {}\n", commit.id())));
        assert!(text.contains("Author: Alice <alice@example.com>\n"));
        assert!(text.contains("Date: Wed Apr 12 10:30:00 UTC 2017\n\n"));
        assert!(text.ends_with("    first line\n    second line\n"));
        assert_eq!(commit.summary(), "first line");
    }

    #[test]
    fn test_history_walks_to_root() {
        let (_dir, store) = setup_store();

        let blob1 = store.put_blob(b"abc").unwrap();
        let tree1 = Tree::for_database("test.sqlite", blob1).unwrap();
        store.put_tree(&tree1).unwrap();
        let c1 = root_commit();
        store.put_commit(&c1).unwrap();

        let blob2 = store.put_blob(b"abcd").unwrap();
        let tree2 = Tree::for_database("test.sqlite", blob2).unwrap();
        store.put_tree(&tree2).unwrap();
        let c2 = Commit::builder()
            .tree(tree2.id())
            .parent(c1.id())
            .author(alice())
            .timestamp(april_12())
            .message("update")
            .build()
            .unwrap();
        store.put_commit(&c2).unwrap();

        let commits = history(&store, c2.id()).unwrap();
        let ids: Vec<_> = commits.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![c2.id(), c1.id()]);
    }

    #[test]
    fn test_history_unknown_start_is_not_found() {
        let (_dir, store) = setup_store();
        let err = history(&store, root_commit().id()).unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound(_)));
    }

    #[test]
    fn test_history_reports_broken_chain() {
        let (dir, store) = setup_store();

        let blob = store.put_blob(b"abc").unwrap();
        let tree = Tree::for_database("test.sqlite", blob).unwrap();
        store.put_tree(&tree).unwrap();
        let c1 = root_commit();
        store.put_commit(&c1).unwrap();
        let c2 = Commit::builder()
            .tree(tree.id())
            .parent(c1.id())
            .author(alice())
            .message("second")
            .build()
            .unwrap();
        store.put_commit(&c2).unwrap();

        // lose the root object behind the store's back
        std::fs::remove_file(dir.path().join("files").join(c1.id().to_string())).unwrap();

        let mut walk = History::new(&store, c2.id());
        assert_eq!(walk.next().unwrap().unwrap().id(), c2.id());
        match walk.next().unwrap() {
            Err(StorageError::BrokenHistory { missing, referenced_by }) => {
                assert_eq!(missing, c1.id().object_id());
                assert_eq!(referenced_by, c2.id().object_id());
            }
            other => panic!("expected broken history, got {:?}", other),
        }
        assert!(walk.next().is_none());
    }
}
