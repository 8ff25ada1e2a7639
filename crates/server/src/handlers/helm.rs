//! Helm chart repository mirror.
//!
//! `index.yaml` is fetched from the upstream and rewritten so that
//! absolute chart URLs point back through the proxy; chart archives are
//! forwarded. Charts whose index entries pointed at a foreign host are
//! reachable under `external/<scheme>/<rest>`.

use crate::error::{ApiError, ApiResult};
use crate::handlers::proxy_response;
use crate::mw::CorrelationId;
use crate::state::AppState;
use axum::Extension;
use axum::extract::{Path, State};
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use axum::response::Response;
use larder_core::repo::{PackageType, RepoConfig};
use larder_upstream::{UpstreamError, copy_forward_headers};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `GET /helm/{repoKey}/{*rest}` — classify and dispatch.
pub async fn handle(
    State(state): State<AppState>,
    Path((repo_key, rest)): Path<(String, String)>,
    Extension(correlation_id): Extension<CorrelationId>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let rest = rest.trim_start_matches('/').to_string();

    if rest.contains("external/") {
        return fetch_external(state, correlation_id, rest, headers).await;
    }

    let cfg = state
        .repos
        .get(&repo_key)
        .ok_or_else(|| ApiError::UnknownRepo(repo_key.clone()))?;

    if rest.ends_with("index.yaml") {
        rewrite_index(state, correlation_id, cfg, rest, headers).await
    } else if rest.ends_with(".tgz") || rest.ends_with(".tar.gz") {
        forward_chart(state, correlation_id, cfg, rest, headers).await
    } else {
        Err(ApiError::NotFound(format!("unsupported helm path: {rest}")))
    }
}

/// Fetch a chart that the rewritten index addressed on a foreign host.
/// The `external/<scheme>/<rest>` form decodes back to an absolute URL.
async fn fetch_external(
    state: AppState,
    correlation_id: CorrelationId,
    rest: String,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let encoded = rest
        .split_once("external/")
        .map(|(_, e)| e)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest(format!("invalid external path: {rest}")))?;

    let target = if let Some(stripped) = encoded.strip_prefix("https/") {
        format!("https://{stripped}")
    } else if let Some(stripped) = encoded.strip_prefix("http/") {
        format!("http://{stripped}")
    } else {
        return Err(ApiError::InvalidRequest(format!(
            "unsupported external URL scheme: {encoded}"
        )));
    };

    let mut forward = HeaderMap::new();
    copy_forward_headers(&mut forward, &headers);
    let response = state
        .http
        .get(&target)
        .headers(forward)
        .send()
        .await
        .map_err(UpstreamError::from)?;

    tracing::info!(
        correlation_id = %correlation_id,
        url = %target,
        status = response.status().as_u16(),
        "external chart passthrough"
    );
    Ok(proxy_response(response))
}

async fn forward_chart(
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
        "chart passthrough"
    );
    Ok(proxy_response(response))
}

async fn rewrite_index(
    state: AppState,
    correlation_id: CorrelationId,
    cfg: RepoConfig,
    rest: String,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if cfg.package_type != PackageType::Helm {
        return Err(ApiError::InvalidRequest(format!(
            "{} is not a helm repository",
            cfg.repo_key
        )));
    }

    let client = state.registry_client(&cfg)?;
    let response = client
        .forward(Method::GET, &format!("/{rest}"), &headers)
        .await?;
    if response.status() != StatusCode::OK {
        return Ok(proxy_response(response));
    }

    let body = response.bytes().await.map_err(UpstreamError::from)?;
    let mut index: HelmIndex = serde_yaml::from_slice(&body)
        .map_err(|e| ApiError::BadUpstreamPayload(format!("index.yaml: {e}")))?;

    let rewritten_count = rewrite_chart_urls(&mut index);
    let rewritten = serde_yaml::to_string(&index)
        .map_err(|e| ApiError::BadUpstreamPayload(format!("index.yaml: {e}")))?;

    tracing::info!(
        correlation_id = %correlation_id,
        repo_key = %cfg.repo_key,
        rewritten = rewritten_count,
        "helm index served"
    );

    let mut out = Response::new(rewritten.into());
    out.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/x-yaml"));
    Ok(out)
}

/// Minimal Helm repository index model. Unknown fields ride along via
/// the flattened maps so a rewrite round-trips the rest of the document.
#[derive(Debug, Serialize, Deserialize)]
struct HelmIndex {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    api_version: Option<String>,
    #[serde(default)]
    entries: BTreeMap<String, Vec<ChartVersion>>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChartVersion {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    urls: Vec<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

/// Rewrite every absolute `.tgz` chart URL into the proxy-relative
/// `external/<scheme>/<rest>` form. Returns how many URLs changed.
fn rewrite_chart_urls(index: &mut HelmIndex) -> usize {
    let mut count = 0;
    for versions in index.entries.values_mut() {
        for version in versions {
            for url in &mut version.urls {
                if let Some(rewritten) = rewrite_chart_url(url) {
                    *url = rewritten;
                    count += 1;
                }
            }
        }
    }
    count
}

fn rewrite_chart_url(url: &str) -> Option<String> {
    let encoded = url
        .strip_prefix("https://")
        .map(|r| format!("https/{r}"))
        .or_else(|| url.strip_prefix("http://").map(|r| format!("http/{r}")))?;

    let path = url.split('?').next().unwrap_or(url);
    if !path.to_ascii_lowercase().ends_with(".tgz") {
        return None;
    }
    Some(format!("external/{encoded}"))
}
