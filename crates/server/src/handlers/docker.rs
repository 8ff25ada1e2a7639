//! OCI v2 pull-through handlers.

use crate::error::{ApiError, ApiResult};
use crate::handlers::proxy_response;
use crate::mw::CorrelationId;
use crate::state::AppState;
use axum::Extension;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use larder_core::repo::RepoConfig;
use larder_core::{Digest, NamespaceResolver, OciUrl, Reference};
use larder_storage::{BlobStore, BlobWrite};
use larder_upstream::is_dropped_header;
use std::pin::Pin;
use std::time::Instant;

/// `GET /v2` — version check.
pub async fn ping() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Docker-Distribution-API-Version", "registry/2.0")],
    )
}

/// `GET /v2/{repoKey}/{*rest}` — classify and dispatch.
pub async fn handle_v2(
    State(state): State<AppState>,
    Path((repo_key, rest)): Path<(String, String)>,
    Extension(correlation_id): Extension<CorrelationId>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let rest = rest.trim_start_matches('/').to_string();
    if rest.contains("/manifests/") {
        get_manifest(state, correlation_id, repo_key, rest, headers).await
    } else if rest.contains("/blobs/") {
        get_blob(state, correlation_id, repo_key, rest, headers).await
    } else {
        Err(ApiError::NotFound(format!("unsupported v2 path: {rest}")))
    }
}

/// Upstream repository path for a downstream name: the repo key is
/// stripped and the upstream's namespace policy applied.
fn normalize_repo(cfg: &RepoConfig, url: &OciUrl) -> String {
    let resolver = NamespaceResolver::for_host(cfg.registry_host());
    resolver.normalize(&url.name().strip_namespace()).to_string()
}

/// Manifest path: headers and body pass straight through. Manifests may
/// be tag-addressed downstream, so nothing is cache-verified here.
async fn get_manifest(
    state: AppState,
    correlation_id: CorrelationId,
    repo_key: String,
    rest: String,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let cfg = state
        .repos
        .get(&repo_key)
        .ok_or_else(|| ApiError::UnknownRepo(repo_key.clone()))?;
    let url = OciUrl::parse_path(&format!("/v2/{repo_key}/{rest}"))?;
    let repo = normalize_repo(&cfg, &url);

    let client = state.registry_client(&cfg)?;
    let response = client
        .fetch_manifest(&repo, &url.reference().to_string(), &headers)
        .await?;

    tracing::info!(
        correlation_id = %correlation_id,
        repo = %repo,
        reference = %url.reference(),
        status = response.status().as_u16(),
        "manifest passthrough"
    );
    Ok(proxy_response(response))
}

/// Blob path: serve from the local store on hit; otherwise fetch from
/// the upstream while streaming downstream and into a verifying atomic
/// writer in a single pass.
async fn get_blob(
    state: AppState,
    correlation_id: CorrelationId,
    repo_key: String,
    rest: String,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let start = Instant::now();
    let cfg = state
        .repos
        .get(&repo_key)
        .ok_or_else(|| ApiError::UnknownRepo(repo_key.clone()))?;
    let url = OciUrl::parse_path(&format!("/v2/{repo_key}/{rest}"))?;
    let digest = match url.reference() {
        Reference::Digest(d) => d.clone(),
        Reference::Tag(tag) => {
            return Err(ApiError::InvalidRequest(format!(
                "expected digest reference, got tag: {tag}"
            )));
        }
    };

    if state.blobs.exists(&digest).await? {
        let stream = state.blobs.get(&digest).await?;
        tracing::info!(
            correlation_id = %correlation_id,
            digest = %digest,
            duration_ms = start.elapsed().as_millis() as u64,
            "blob served from local store"
        );
        return Ok(cached_blob_response(stream, &digest));
    }

    let repo = normalize_repo(&cfg, &url);
    let client = state.registry_client(&cfg)?;
    let response = client.fetch_blob(&repo, &digest, &headers).await?;
    if response.status() != StatusCode::OK {
        return Err(ApiError::UpstreamStatus(response.status()));
    }

    let mut response_headers = HeaderMap::new();
    for (name, value) in response.headers() {
        if !is_dropped_header(name.as_str()) {
            response_headers.append(name.clone(), value.clone());
        }
    }

    let writer = state.blobs.writer_atomic(&digest).await?;
    let progress = StreamProgress::new(correlation_id, digest, start);
    let body = Body::from_stream(tee_to_cache(response.bytes_stream(), writer, progress));

    let mut out = Response::new(body);
    *out.headers_mut() = response_headers;
    Ok(out)
}

fn cached_blob_response(stream: larder_storage::ByteStream, digest: &Digest) -> Response {
    let body = Body::from_stream(stream.map(|r| r.map_err(std::io::Error::other)));
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    if let Ok(value) = HeaderValue::from_str(&digest.to_string()) {
        response
            .headers_mut()
            .insert(header::HeaderName::from_static("docker-content-digest"), value);
    }
    response
}

/// Completion bookkeeping for an in-flight blob stream. Dropping it
/// before completion means the client disconnected or the server is
/// draining; that is logged at warn, not treated as an upstream error.
struct StreamProgress {
    correlation_id: CorrelationId,
    digest: Digest,
    start: Instant,
    written: u64,
    done: bool,
}

impl StreamProgress {
    fn new(correlation_id: CorrelationId, digest: Digest, start: Instant) -> Self {
        Self {
            correlation_id,
            digest,
            start,
            written: 0,
            done: false,
        }
    }
}

impl Drop for StreamProgress {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                digest = %self.digest,
                written = self.written,
                "blob streaming aborted by client disconnect or shutdown"
            );
        }
    }
}

/// Duplicate the upstream body to the downstream client and the cache
/// writer with one copy loop. The writer's finish runs digest
/// verification; by then the downstream bytes are already committed, so
/// a mismatch is logged and the partial entry discarded rather than
/// rewritten into the response.
fn tee_to_cache(
    upstream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    writer: Box<dyn BlobWrite>,
    mut progress: StreamProgress,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>> {
    Box::pin(async_stream::try_stream! {
        let mut upstream = Box::pin(upstream);
        let mut writer = Some(writer);

        while let Some(chunk) = upstream.next().await {
            let chunk = chunk.map_err(std::io::Error::other)?;
            if let Some(w) = writer.as_mut() {
                w.write(chunk.clone()).await.map_err(std::io::Error::other)?;
            }
            progress.written += chunk.len() as u64;
            yield chunk;
        }

        progress.done = true;
        if let Some(w) = writer.take() {
            match w.finish().await {
                Ok(size) => tracing::info!(
                    correlation_id = %progress.correlation_id,
                    digest = %progress.digest,
                    size,
                    duration_ms = progress.start.elapsed().as_millis() as u64,
                    "blob streamed from upstream and cached"
                ),
                Err(e) => tracing::error!(
                    correlation_id = %progress.correlation_id,
                    digest = %progress.digest,
                    error = %e,
                    "cache write rejected after streaming; entry discarded"
                ),
            }
        }
    })
}
