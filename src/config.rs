//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::storage::{BranchName, Signature, StorageResult, DEFAULT_LOCK_TIMEOUT};

/// Environment variable naming the storage root.
pub const ENV_STORAGE_DIR: &str = "DIO_STORAGE_DIR";
/// Environment variable with the default author name.
pub const ENV_AUTHOR: &str = "DIO_AUTHOR";
/// Environment variable with the default author email.
pub const ENV_EMAIL: &str = "DIO_EMAIL";
/// Environment variable with the default branch.
pub const ENV_BRANCH: &str = "DIO_BRANCH";

/// Store configuration options.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory holding `files/` and `meta/`.
    pub root: PathBuf,
    /// How long to wait for another process's metadata lock.
    pub lock_timeout: Duration,
    /// Branch used when a command doesn't name one.
    pub default_branch: BranchName,
    /// Author used when a command doesn't give one.
    pub author_name: Option<String>,
    /// Email used when a command doesn't give one.
    pub author_email: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".dio"),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            default_branch: BranchName::master(),
            author_name: None,
            author_email: None,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with the given storage root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Build a configuration from `DIO_*` environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any variable lookup; unset or empty values keep defaults.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> StorageResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(root) = get(ENV_STORAGE_DIR) {
            config.root = PathBuf::from(root);
        }
        if let Some(branch) = get(ENV_BRANCH) {
            config.default_branch = BranchName::new(branch)?;
        }
        config.author_name = get(ENV_AUTHOR);
        config.author_email = get(ENV_EMAIL);

        Ok(config)
    }

    /// Set the storage root.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the lock timeout.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the default branch.
    pub fn default_branch(mut self, branch: BranchName) -> Self {
        self.default_branch = branch;
        self
    }

    /// Set the default author.
    pub fn author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = Some(name.into());
        self.author_email = Some(email.into());
        self
    }

    /// The default author, if both name and email are configured.
    pub fn signature(&self) -> Option<Signature> {
        match (&self.author_name, &self.author_email) {
            (Some(name), Some(email)) => Some(Signature::new(name.clone(), email.clone())),
            _ => None,
        }
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join("meta")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.root, PathBuf::from(".dio"));
        assert_eq!(config.default_branch.as_str(), "master");
        assert!(config.signature().is_none());
        assert_eq!(config.objects_dir(), PathBuf::from(".dio").join("files"));
        assert_eq!(config.meta_dir(), PathBuf::from(".dio").join("meta"));
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::new("/srv/dio")
            .lock_timeout(Duration::from_secs(1))
            .default_branch(BranchName::new("main").unwrap())
            .author("Alice", "alice@example.com");

        assert_eq!(config.root, PathBuf::from("/srv/dio"));
        assert_eq!(config.lock_timeout, Duration::from_secs(1));
        assert_eq!(config.default_branch.as_str(), "main");
        assert_eq!(
            config.signature(),
            Some(Signature::new("Alice", "alice@example.com"))
        );
    }

    #[test]
    fn test_from_vars() {
        let env = vars(&[
            (ENV_STORAGE_DIR, "/tmp/store"),
            (ENV_AUTHOR, "Alice"),
            (ENV_EMAIL, "alice@example.com"),
            (ENV_BRANCH, ""),
        ]);
        let config = StoreConfig::from_vars(|k| env.get(k).cloned()).unwrap();

        assert_eq!(config.root, PathBuf::from("/tmp/store"));
        assert_eq!(config.default_branch.as_str(), "master");
        assert!(config.signature().is_some());
    }

    #[test]
    fn test_from_vars_rejects_bad_branch() {
        let env = vars(&[(ENV_BRANCH, "bad branch")]);
        let err = StoreConfig::from_vars(|k| env.get(k).cloned()).unwrap_err();
        assert!(err.is_validation());
    }
}
