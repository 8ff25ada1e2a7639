//! Application state shared across handlers.

use larder_core::config::AppConfig;
use larder_core::repo::{RepoConfig, RepoConfigStore};
use larder_storage::{BlobStore, PathIndex};
use larder_upstream::{RegistryClient, TokenCache, UpstreamResult, transport_chain};
use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Content-addressed blob store.
    pub blobs: Arc<dyn BlobStore>,
    /// Path → digest index for non-OCI mirrors.
    pub index: Arc<PathIndex>,
    /// Repo-key → upstream configuration.
    pub repos: Arc<RepoConfigStore>,
    /// Scope-keyed upstream token cache.
    pub tokens: Arc<TokenCache>,
    /// Shared upstream HTTP client; one per process so connection pools
    /// survive across requests.
    pub http: reqwest::Client,
    /// Directory for mirror spool files.
    pub spool_dir: PathBuf,
}

impl AppState {
    /// Create application state from its prebuilt parts.
    pub fn new(
        config: AppConfig,
        blobs: Arc<dyn BlobStore>,
        index: Arc<PathIndex>,
        repos: Arc<RepoConfigStore>,
        tokens: Arc<TokenCache>,
        http: reqwest::Client,
    ) -> Self {
        let spool_dir = config.cache.path.join("tmp");
        Self {
            config: Arc::new(config),
            blobs,
            index,
            repos,
            tokens,
            http,
            spool_dir,
        }
    }

    /// Build the layered registry client for one upstream. The transport
    /// chain shares the process-wide HTTP client and token cache.
    pub fn registry_client(&self, cfg: &RepoConfig) -> UpstreamResult<RegistryClient> {
        let credentials = match (&cfg.username, &cfg.password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            _ => None,
        };
        let transport = transport_chain(
            self.http.clone(),
            credentials,
            self.tokens.clone(),
            self.config.server.trace,
        )?;
        Ok(RegistryClient::new(&cfg.remote_url, transport))
    }
}
