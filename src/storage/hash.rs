//! Deterministic identity for commits and trees.
//!
//! The byte layouts below are shared with the remote side, which computes
//! the same IDs independently. Changing a single byte here (field order,
//! separators, timestamp layout) makes every ID disagree with the server.
//!
//! Commit payload:
//!
//! ```text
//! tree <tree id>\n
//! parent <parent id>\n                       (only when there is a parent)
//! author <name> <<email>> <timestamp>\n
//! committer <name> <<email>> <timestamp>\n   (only when explicitly set)
//! \n
//! <message bytes>\0
//! ```
//!
//! The message is written verbatim; it may be empty or contain any byte,
//! including NUL, since the payload simply ends with one more NUL. The only
//! local restriction on top of this layout is that names and emails can't
//! contain a line break, which would let a signature pose as another header.
//!
//! Tree payload, one record per entry in stored order:
//!
//! ```text
//! <entry type>\0<blob id>\0<name>\n
//! ```

use chrono::{DateTime, Utc};

use crate::storage::commit::Commit;
use crate::storage::tree::TreeEntry;
use crate::storage::types::{CommitId, ObjectId, Signature, TreeId};

/// Unix `date` layout, always rendered in UTC.
pub const TIMESTAMP_FORMAT: &str = "%a %b %e %H:%M:%S UTC %Y";

/// render a timestamp the way it appears in commit payloads
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// build the exact bytes a commit ID is computed over
pub fn commit_payload(
    tree: TreeId,
    parent: Option<CommitId>,
    author: &Signature,
    committer: Option<&Signature>,
    timestamp: &DateTime<Utc>,
    message: &str,
) -> Vec<u8> {
    let when = format_timestamp(timestamp);
    let mut buf = String::with_capacity(256 + message.len());

    buf.push_str(&format!("tree {}\n", tree));
    if let Some(parent) = parent {
        buf.push_str(&format!("parent {}\n", parent));
    }
    buf.push_str(&format!("author {} <{}> {}\n", author.name, author.email, when));
    if let Some(committer) = committer {
        buf.push_str(&format!(
            "committer {} <{}> {}\n",
            committer.name, committer.email, when
        ));
    }
    buf.push('\n');
    buf.push_str(message);

    let mut bytes = buf.into_bytes();
    bytes.push(0);
    bytes
}

/// compute the ID of a commit from its fields (the stored ID is ignored)
pub fn hash_commit(commit: &Commit) -> CommitId {
    let payload = commit_payload(
        commit.tree(),
        commit.parent(),
        commit.author(),
        commit.explicit_committer(),
        commit.timestamp(),
        commit.message(),
    );
    CommitId::new(ObjectId::digest(&payload))
}

/// build the exact bytes a tree ID is computed over
pub fn tree_payload(entries: &[TreeEntry]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(entries.len() * 96);
    for entry in entries {
        bytes.extend_from_slice(entry.entry_type.as_str().as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(entry.sha_sum.to_string().as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(entry.name.as_bytes());
        bytes.push(b'\n');
    }
    bytes
}

/// compute the ID of an ordered entry list
pub fn hash_tree(entries: &[TreeEntry]) -> TreeId {
    TreeId::new(ObjectId::digest(&tree_payload(entries)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tree::EntryType;
    use crate::storage::types::BlobId;
    use chrono::TimeZone;

    const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
    const ABCD: &str = "88d4266fd4e6338d13b845fcf289579d209c897823b9217da3e161936f031589";
    const T1: &str = "47724a60fef355c9ec436bbeba66efac42a648650dec45613f05edfd41002226";

    fn entry(entry_type: EntryType, sha: &str, name: &str) -> TreeEntry {
        TreeEntry::new(entry_type, BlobId::from_hex(sha).unwrap(), name)
    }

    fn alice() -> Signature {
        Signature::new("Alice", "alice@example.com")
    }

    fn april_12() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 4, 12, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_timestamp_layout() {
        assert_eq!(format_timestamp(&april_12()), "Wed Apr 12 10:30:00 UTC 2017");

        // single digit days are space padded, not zero padded
        let april_5 = Utc.with_ymd_and_hms(2017, 4, 5, 7, 8, 9).unwrap();
        assert_eq!(format_timestamp(&april_5), "Wed Apr  5 07:08:09 UTC 2017");
    }

    #[test]
    fn test_tree_payload_layout() {
        let entries = vec![entry(EntryType::Database, ABC, "test.sqlite")];
        let expected = format!("db\0{}\0test.sqlite\n", ABC);
        assert_eq!(tree_payload(&entries), expected.into_bytes());
    }

    #[test]
    fn test_tree_id_is_pinned() {
        let entries = vec![entry(EntryType::Database, ABC, "test.sqlite")];
        assert_eq!(hash_tree(&entries).to_string(), T1);
        // same input, same answer
        assert_eq!(hash_tree(&entries), hash_tree(&entries.clone()));
    }

    #[test]
    fn test_tree_id_depends_on_order() {
        let forward = vec![
            entry(EntryType::Database, ABC, "a.sqlite"),
            entry(EntryType::Licence, ABCD, "LICENSE"),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        assert_eq!(
            hash_tree(&forward).to_string(),
            "92b566f92816b710ac97644e5a74c2bdcf49781dcc6e61181341d7e79ab8f3aa"
        );
        assert_eq!(
            hash_tree(&reversed).to_string(),
            "daa1c3c60bf0d5e8f7e313610f6e131eaf044b86f77097a5c106e37eeef1f0c6"
        );
    }

    #[test]
    fn test_commit_payload_layout() {
        let tree = TreeId::from_hex(T1).unwrap();
        let parent = CommitId::from_hex(ABC).unwrap();
        let bob = Signature::new("Bob", "bob@example.com");

        let payload = commit_payload(tree, Some(parent), &alice(), Some(&bob), &april_12(), "msg");
        let expected = format!(
            "tree {}\nparent {}\nauthor Alice <alice@example.com> Wed Apr 12 10:30:00 UTC 2017\n\
             committer Bob <bob@example.com> Wed Apr 12 10:30:00 UTC 2017\n\nmsg\0",
            T1, ABC
        );
        assert_eq!(String::from_utf8(payload).unwrap(), expected);
    }

    #[test]
    fn test_root_commit_payload_omits_optional_lines() {
        let tree = TreeId::from_hex(T1).unwrap();
        let payload = commit_payload(tree, None, &alice(), None, &april_12(), "");
        let text = String::from_utf8(payload).unwrap();

        assert!(!text.contains("parent "));
        assert!(!text.contains("committer "));
        assert!(text.ends_with("2017\n\n\0"));
    }

    #[test]
    fn test_commit_ids_are_pinned() {
        let tree = TreeId::from_hex(T1).unwrap();
        let root = ObjectId::digest(&commit_payload(tree, None, &alice(), None, &april_12(), "init"));
        assert_eq!(
            root.to_hex(),
            "3336127467bcaa5c1829b7dba5845c33d6e215aeb2f68594141a788d522de012"
        );

        let empty_message =
            ObjectId::digest(&commit_payload(tree, None, &alice(), None, &april_12(), ""));
        assert_eq!(
            empty_message.to_hex(),
            "2b55f99fafbbf4e24f32a887aab562badae78746d058755e2c24d14d4683cd3a"
        );

        let bob = Signature::new("Bob", "bob@example.com");
        let with_committer =
            ObjectId::digest(&commit_payload(tree, None, &alice(), Some(&bob), &april_12(), "init"));
        assert_eq!(
            with_committer.to_hex(),
            "348fde837dbd8932b0b8f9f71e93035ffc52884477a1a569d08c2d32748c19fa"
        );
    }
}
