//! Debian APT mirror.
//!
//! Repository metadata under `dists/` is forwarded as-is; the archive
//! never caches it because it changes underneath its signatures. Pool
//! objects are immutable, so they are cached: the upstream body is
//! streamed to the client while being spooled and hashed, then committed
//! to the blob store with the path recorded in the index.

use crate::error::{ApiError, ApiResult};
use crate::handlers::proxy_response;
use crate::mw::CorrelationId;
use crate::state::AppState;
use axum::Extension;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use larder_core::repo::RepoConfig;
use larder_storage::{BlobStore, PathIndex, SealedSpool, Spool};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Metadata filenames served straight through from the upstream archive.
const DIST_SUFFIXES: [&str; 6] = [
    "InRelease",
    "Release",
    "Release.gpg",
    "Packages",
    "Packages.gz",
    "Packages.xz",
];

/// `GET /debian/{repoKey}/{*rest}` — classify and dispatch.
pub async fn handle(
    State(state): State<AppState>,
    Path((repo_key, rest)): Path<(String, String)>,
    Extension(correlation_id): Extension<CorrelationId>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let rest = rest.trim_start_matches('/').to_string();
    let cfg = state
        .repos
        .get(&repo_key)
        .ok_or_else(|| ApiError::UnknownRepo(repo_key.clone()))?;

    if rest.contains("dists/") && DIST_SUFFIXES.iter().any(|s| rest.ends_with(s)) {
        forward_metadata(state, correlation_id, cfg, rest, headers).await
    } else if rest.contains("pool/") {
        serve_pool(state, correlation_id, cfg, repo_key, rest, headers).await
    } else {
        Err(ApiError::NotFound(format!("unsupported debian path: {rest}")))
    }
}

async fn forward_metadata(
    state: AppState,
    correlation_id: CorrelationId,
    cfg: RepoConfig,
    rest: String,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let client = state.registry_client(&cfg)?;
    let response = client
        .forward(Method::GET, &format!("/{rest}"), &headers)
        .await?;
    tracing::info!(
        correlation_id = %correlation_id,
        repo_key = %cfg.repo_key,
        path = %rest,
        status = response.status().as_u16(),
        "debian metadata passthrough"
    );
    Ok(proxy_response(response))
}

async fn serve_pool(
    state: AppState,
    correlation_id: CorrelationId,
    cfg: RepoConfig,
    repo_key: String,
    rest: String,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let start = Instant::now();

    if let Some(digest) = state.index.get(&repo_key, &rest).await?
        && state.blobs.exists(&digest).await?
    {
        let stream = state.blobs.get(&digest).await?;
        tracing::info!(
            correlation_id = %correlation_id,
            repo_key = %repo_key,
            path = %rest,
            digest = %digest,
            duration_ms = start.elapsed().as_millis() as u64,
            "pool object served from local store"
        );
        return Ok(stored_pool_response(stream));
    }

    let client = state.registry_client(&cfg)?;
    let response = client
        .forward(Method::GET, &format!("/{rest}"), &headers)
        .await?;
    if response.status() != StatusCode::OK {
        // Error bodies are never worth caching.
        return Ok(proxy_response(response));
    }

    let mut response_headers = HeaderMap::new();
    for (name, value) in response.headers() {
        if !larder_upstream::is_dropped_header(name.as_str()) {
            response_headers.append(name.clone(), value.clone());
        }
    }

    let body = Body::from_stream(spool_and_stream(
        response.bytes_stream(),
        state.spool_dir.clone(),
        state.blobs.clone(),
        state.index.clone(),
        correlation_id,
        repo_key,
        rest,
    ));
    let mut out = Response::new(body);
    *out.headers_mut() = response_headers;
    Ok(out)
}

fn stored_pool_response(stream: larder_storage::ByteStream) -> Response {
    let body = Body::from_stream(stream.map(|r| r.map_err(std::io::Error::other)));
    let mut response = Response::new(body);
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response
}

/// Stream the upstream body downstream while spooling and hashing it;
/// once complete, commit the spool to the blob store and record the
/// path → digest mapping. The downstream response is already committed
/// by commit time, so commit failures are logged only.
fn spool_and_stream(
    upstream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    spool_dir: PathBuf,
    blobs: Arc<dyn BlobStore>,
    index: Arc<PathIndex>,
    correlation_id: CorrelationId,
    repo_key: String,
    rest: String,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>> {
    Box::pin(async_stream::try_stream! {
        let mut spool = Spool::create(&spool_dir).await.map_err(std::io::Error::other)?;
        let mut upstream = Box::pin(upstream);

        while let Some(chunk) = upstream.next().await {
            let chunk = chunk.map_err(std::io::Error::other)?;
            spool.write(&chunk).await.map_err(std::io::Error::other)?;
            yield chunk;
        }

        let sealed = spool.seal().await.map_err(std::io::Error::other)?;
        match commit(&blobs, &index, &repo_key, &rest, &sealed).await {
            Ok(()) => tracing::info!(
                correlation_id = %correlation_id,
                repo_key = %repo_key,
                path = %rest,
                digest = %sealed.digest(),
                size = sealed.len(),
                "pool object cached"
            ),
            Err(e) => tracing::error!(
                correlation_id = %correlation_id,
                repo_key = %repo_key,
                path = %rest,
                error = %e,
                "failed to cache pool object"
            ),
        }
    })
}

async fn commit(
    blobs: &Arc<dyn BlobStore>,
    index: &Arc<PathIndex>,
    repo_key: &str,
    rest: &str,
    sealed: &SealedSpool,
) -> larder_storage::StorageResult<()> {
    let reader = sealed.open().await?;
    blobs.put(sealed.digest(), reader).await?;
    index.put(repo_key, rest, sealed.digest()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dist_suffix_classification() {
        for path in [
            "debian/dists/stable/InRelease",
            "debian/dists/stable/Release",
            "debian/dists/stable/Release.gpg",
            "debian/dists/stable/main/binary-amd64/Packages",
            "debian/dists/stable/main/binary-amd64/Packages.gz",
            "debian/dists/stable/main/binary-amd64/Packages.xz",
        ] {
            assert!(
                path.contains("dists/") && DIST_SUFFIXES.iter().any(|s| path.ends_with(s)),
                "{path}"
            );
        }
        // Pool paths must not classify as metadata.
        let pool = "debian/pool/main/c/curl/curl_8.5.0-2_amd64.deb";
        assert!(!DIST_SUFFIXES.iter().any(|s| pool.ends_with(s)));
        assert!(pool.contains("pool/"));
    }
}
