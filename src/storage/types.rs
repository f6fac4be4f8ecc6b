//! core type-safe wrappers for identifiers and names used by the storage layer.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::storage::lock::METADATA_FILES;

/// A SHA-256 content hash, rendered as 64 lowercase hex characters.
///
/// This is the only identity objects have: the file name in the store,
/// the parent/tree references inside commits and the IDs the remote side
/// computes all use this form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// hash arbitrary bytes
    pub fn digest(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// parse an ObjectId from a 64 character hex string
    pub fn from_hex(hex_str: &str) -> Result<Self, InvalidNameError> {
        let mut raw = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut raw)
            .map_err(|_| InvalidNameError::InvalidHash(hex_str.to_string()))?;
        Ok(Self(raw))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// short form, for log output
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// This makes sure we don't accidentally pass a blob ID where a commit ID
/// is expected. All three wrap the same hash type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub(crate) ObjectId);

impl CommitId {
    pub(crate) fn new(id: ObjectId) -> Self {
        Self(id)
    }

    /// the untyped hash
    pub fn object_id(&self) -> ObjectId {
        self.0
    }

    /// parse CommitId from a hex string
    pub fn from_hex(hex_str: &str) -> Result<Self, InvalidNameError> {
        ObjectId::from_hex(hex_str).map(CommitId)
    }

    /// short form of the commit ID
    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tree identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeId(pub(crate) ObjectId);

impl TreeId {
    pub(crate) fn new(id: ObjectId) -> Self {
        Self(id)
    }

    pub fn object_id(&self) -> ObjectId {
        self.0
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, InvalidNameError> {
        ObjectId::from_hex(hex_str).map(TreeId)
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Blob identifier: the SHA-256 of the raw database bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(pub(crate) ObjectId);

impl BlobId {
    /// identity of a byte sequence
    pub fn for_content(bytes: &[u8]) -> Self {
        Self(ObjectId::digest(bytes))
    }

    pub fn object_id(&self) -> ObjectId {
        self.0
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, InvalidNameError> {
        ObjectId::from_hex(hex_str).map(BlobId)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated database path.
///
/// This names the metadata directory of one tracked database, so it has to
/// stay inside `meta/`:
/// - non-empty, relative, `/` separated
/// - no empty, `.` or `..` segments
/// - no backslashes or control characters
/// - no `index`, `branches` or `lock` segment below the first, since those
///   are the metadata files of the enclosing database
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatabasePath(String);

impl DatabasePath {
    pub fn new(path: impl Into<String>) -> Result<Self, InvalidNameError> {
        let path = path.into();
        Self::validate(&path)?;
        Ok(Self(path))
    }

    fn validate(path: &str) -> Result<(), InvalidNameError> {
        if path.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if path.len() > 255 {
            return Err(InvalidNameError::TooLong(path.len()));
        }
        if path.starts_with('/') {
            return Err(InvalidNameError::InvalidPath(path.to_string()));
        }
        for (i, c) in path.chars().enumerate() {
            if c == '\\' || c.is_control() {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }
        if path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(InvalidNameError::InvalidPath(path.to_string()));
        }
        if let Some(segment) = path
            .split('/')
            .skip(1)
            .find(|segment| METADATA_FILES.contains(segment))
        {
            return Err(InvalidNameError::Reserved(segment.to_string()));
        }
        Ok(())
    }

    /// derive the database path from a file on disk (its file name)
    pub fn from_file(file: &Path) -> Result<Self, InvalidNameError> {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| InvalidNameError::InvalidPath(file.display().to_string()))?;
        Self::new(name)
    }

    /// the final path segment, used as the tree entry name
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// the path relative to a metadata root
    pub fn to_relative_path(&self) -> PathBuf {
        self.0.split('/').collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatabasePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DatabasePath {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DatabasePath> for String {
    fn from(value: DatabasePath) -> Self {
        value.0
    }
}

/// a branch name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// the branch used when none is given
    pub const MASTER: &'static str = "master";

    /// create a new BranchName
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.len() > 255 {
            return Err(InvalidNameError::TooLong(name.len()));
        }
        if name.contains("..") || name.ends_with('/') || name.starts_with('/') {
            return Err(InvalidNameError::InvalidPath(name));
        }
        for (i, c) in name.chars().enumerate() {
            if c.is_whitespace() || c.is_control() {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }
        Ok(Self(name))
    }

    pub fn master() -> Self {
        Self(Self::MASTER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for BranchName {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BranchName> for String {
    fn from(value: BranchName) -> Self {
        value.0
    }
}

/// author or committer identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// names and emails must be present and fit on one payload line
    pub(crate) fn validate(&self, role: &'static str) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err(format!("{} name is required", role));
        }
        if self.email.trim().is_empty() {
            return Err(format!("{} email is required", role));
        }
        for (field, value) in [("name", &self.name), ("email", &self.email)] {
            if value.contains('\n') {
                return Err(format!("{} {} contains a line break", role, field));
            }
        }
        Ok(())
    }
}

/// error type for invalid names and identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    InvalidPath(String),
    InvalidHash(String),
    Reserved(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
            Self::InvalidHash(hash) => write!(f, "not a sha256 hex digest: '{}'", hash),
            Self::Reserved(segment) => write!(f, "'{}' is reserved for metadata files", segment),
        }
    }
}

impl std::error::Error for InvalidNameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex() {
        let id = ObjectId::digest(b"abc");
        assert_eq!(
            id.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(ObjectId::from_hex(&id.to_hex()).unwrap(), id);
        assert_eq!(id.short(), "ba7816bf");
    }

    #[test]
    fn test_object_id_rejects_bad_hex() {
        assert!(ObjectId::from_hex("").is_err());
        assert!(ObjectId::from_hex("abc").is_err());
        assert!(ObjectId::from_hex(&"zz".repeat(32)).is_err());
        assert!(ObjectId::from_hex(&"ab".repeat(33)).is_err());
    }

    #[test]
    fn test_object_id_serde_is_plain_hex() {
        let id = BlobId::for_content(b"abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(
            json,
            "\"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad\""
        );
        let back: BlobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_database_path_valid() {
        assert!(DatabasePath::new("chinook.sqlite").is_ok());
        assert!(DatabasePath::new("team/sales.db").is_ok());
        assert_eq!(DatabasePath::new("team/sales.db").unwrap().file_name(), "sales.db");
        assert_eq!(
            DatabasePath::new("team/sales.db").unwrap().to_relative_path(),
            PathBuf::from("team").join("sales.db")
        );
    }

    #[test]
    fn test_database_path_invalid() {
        assert!(DatabasePath::new("").is_err());
        assert!(DatabasePath::new("/etc/passwd").is_err());
        assert!(DatabasePath::new("../escape.db").is_err());
        assert!(DatabasePath::new("a//b.db").is_err());
        assert!(DatabasePath::new("a/./b.db").is_err());
        assert!(DatabasePath::new("dir/").is_err());
        assert!(DatabasePath::new("a\\b.db").is_err());
    }

    #[test]
    fn test_database_path_cannot_shadow_metadata_files() {
        for name in ["team/index", "team/lock", "team/branches", "x/index/y.db"] {
            assert_eq!(
                DatabasePath::new(name),
                Err(InvalidNameError::Reserved(name.split('/').nth(1).unwrap().to_string()))
            );
        }
        // a top-level directory of that name holds no files of its own
        assert!(DatabasePath::new("index/sales.db").is_ok());
        assert!(DatabasePath::new("team/index.db").is_ok());
    }

    #[test]
    fn test_database_path_deserialize_validates() {
        let ok: Result<DatabasePath, _> = serde_json::from_str("\"x.db\"");
        assert!(ok.is_ok());
        let bad: Result<DatabasePath, _> = serde_json::from_str("\"../x.db\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_branch_name() {
        assert_eq!(BranchName::master().as_str(), "master");
        assert!(BranchName::new("feature/new-schema").is_ok());
        assert!(BranchName::new("").is_err());
        assert!(BranchName::new("a..b").is_err());
        assert!(BranchName::new("/lead").is_err());
        assert!(BranchName::new("has space").is_err());
    }

    #[test]
    fn test_signature_validation() {
        assert!(Signature::new("Alice", "alice@example.com").validate("author").is_ok());
        assert!(Signature::new("", "alice@example.com").validate("author").is_err());
        assert!(Signature::new("Alice", " ").validate("author").is_err());
        // angle brackets hash fine on both sides, only line breaks are refused
        assert!(Signature::new("Al<ice>", "alice@example.com").validate("author").is_ok());
        assert!(Signature::new("Alice", "alice@example.com\n").validate("author").is_err());
    }
}
