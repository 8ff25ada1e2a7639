//! Repository configuration and the concurrent repo-key store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Kind of upstream a repo key points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Docker,
    Debian,
    Helm,
}

/// A single repo-key → upstream mapping.
#[derive(Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub repo_key: String,
    pub remote_url: String,
    pub package_type: PackageType,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RepoConfig {
    /// Whether static credentials are configured.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// The upstream host, without scheme or path.
    pub fn registry_host(&self) -> &str {
        let host = match self.remote_url.split_once("://") {
            Some((_, rest)) => rest,
            None => &self.remote_url,
        };
        host.split('/').next().unwrap_or(host)
    }
}

impl fmt::Debug for RepoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoConfig")
            .field("repo_key", &self.repo_key)
            .field("remote_url", &self.remote_url)
            .field("package_type", &self.package_type)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// In-memory mapping from repo key to [`RepoConfig`].
///
/// Populated at startup, read-mostly afterwards. Reads return clones so
/// callers never observe a mid-mutation entry.
#[derive(Default)]
pub struct RepoConfigStore {
    configs: RwLock<HashMap<String, RepoConfig>>,
}

impl RepoConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a repo-key mapping.
    pub fn add(&self, cfg: RepoConfig) {
        let mut configs = self.configs.write().unwrap_or_else(|e| e.into_inner());
        configs.insert(cfg.repo_key.clone(), cfg);
    }

    /// Retrieve a repo config by key.
    pub fn get(&self, repo_key: &str) -> Option<RepoConfig> {
        let configs = self.configs.read().unwrap_or_else(|e| e.into_inner());
        configs.get(repo_key).cloned()
    }

    /// Remove a repo config by key.
    pub fn delete(&self, repo_key: &str) {
        let mut configs = self.configs.write().unwrap_or_else(|e| e.into_inner());
        configs.remove(repo_key);
    }

    /// All repo configs, sorted by key for deterministic iteration.
    pub fn list(&self) -> Vec<RepoConfig> {
        let configs = self.configs.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<RepoConfig> = configs.values().cloned().collect();
        out.sort_by(|a, b| a.repo_key.cmp(&b.repo_key));
        out
    }
}
