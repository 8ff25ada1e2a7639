//! Application configuration.
//!
//! Loaded from a YAML document. `${VAR}` placeholders in the raw text are
//! substituted from the environment before parsing; an unset variable
//! expands to the empty string, which credential fields then normalize
//! to absent.

use crate::repo::{PackageType, RepoConfig};
use figment::Figment;
use figment::providers::{Format, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (e.g. ":5000", "127.0.0.1:8080").
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Log upstream requests and responses.
    #[serde(default)]
    pub trace: bool,
    /// Externally visible base URL, used when rewriting mirror indexes.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

/// Cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory of the content-addressed store.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

/// One configured upstream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub package_type: PackageType,
    pub remote_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Top-level application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,
}

fn default_listen() -> String {
    ":5000".to_string()
}

fn default_public_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("/tmp/larder/cache")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            trace: false,
            public_url: default_public_url(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("read {}: {e}", path.display())))?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from a raw YAML document.
    pub fn from_yaml(raw: &str) -> crate::Result<Self> {
        let expanded = expand_env(raw);
        let mut config: AppConfig = Figment::new()
            .merge(Yaml::string(&expanded))
            .extract()
            .map_err(|e| crate::Error::Config(e.to_string()))?;

        for remote in config.remotes.values_mut() {
            remote.remote_url = remote.remote_url.trim_end_matches('/').to_string();
            remote.username = normalize_credential(remote.username.take());
            remote.password = normalize_credential(remote.password.take());
        }

        Ok(config)
    }

    /// The configured remotes as [`RepoConfig`] values.
    pub fn repo_configs(&self) -> Vec<RepoConfig> {
        self.remotes
            .iter()
            .map(|(key, remote)| RepoConfig {
                repo_key: key.clone(),
                remote_url: remote.remote_url.clone(),
                package_type: remote.package_type,
                username: remote.username.clone(),
                password: remote.password.clone(),
            })
            .collect()
    }

    /// A minimal configuration for tests.
    pub fn for_testing(cache_path: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig {
                path: cache_path.to_path_buf(),
            },
            remotes: BTreeMap::new(),
        }
    }
}

/// Substitute `${VAR}` placeholders from the environment. Unset variables
/// expand to the empty string.
fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if let Ok(value) = std::env::var(var) {
                    out.push_str(&value);
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated placeholder, keep the remainder verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Empty strings and surviving `${VAR}` placeholders mean "not set".
fn normalize_credential(value: Option<String>) -> Option<String> {
    let value = value?;
    if value.is_empty() || (value.starts_with("${") && value.ends_with('}')) {
        return None;
    }
    Some(value)
}
