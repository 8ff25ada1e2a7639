//! Common test utilities.

use axum::Router;
use axum::body::Body;
use axum::http::header::HeaderMap;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use larder_core::config::AppConfig;
use larder_core::repo::{PackageType, RepoConfig, RepoConfigStore};
use larder_server::{AppState, create_router};
use larder_storage::{BlobStore, FsBlobStore, PathIndex};
use larder_upstream::TokenCache;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A router plus its backing state and scratch directory.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server backed by a temporary cache directory.
    pub async fn new(remotes: Vec<RepoConfig>) -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let cache_path = temp_dir.path().join("cache");
        let config = AppConfig::for_testing(&cache_path);

        let blobs: Arc<dyn BlobStore> = Arc::new(
            FsBlobStore::new(&cache_path)
                .await
                .expect("failed to create blob store"),
        );
        let index = Arc::new(
            PathIndex::new(cache_path.join("index"))
                .await
                .expect("failed to create path index"),
        );
        let repos = Arc::new(RepoConfigStore::new());
        for remote in remotes {
            repos.add(remote);
        }
        let tokens = Arc::new(TokenCache::new());

        let state = AppState::new(
            config,
            blobs,
            index,
            repos,
            tokens,
            reqwest::Client::new(),
        );
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Issue a GET request against the router.
    pub async fn get(&self, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
        self.get_with_headers(uri, &[]).await
    }

    /// Issue a GET request with extra headers.
    pub async fn get_with_headers(
        &self,
        uri: &str,
        headers: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, Bytes) {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }
}

/// Build a repo config pointing at a test upstream.
#[allow(dead_code)]
pub fn remote(repo_key: &str, remote_url: &str, package_type: PackageType) -> RepoConfig {
    RepoConfig {
        repo_key: repo_key.to_string(),
        remote_url: remote_url.trim_end_matches('/').to_string(),
        package_type,
        username: None,
        password: None,
    }
}
