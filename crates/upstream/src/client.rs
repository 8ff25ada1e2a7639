//! Typed client for the OCI distribution v2 API.

use crate::error::{UpstreamError, UpstreamResult};
use crate::transport::Transport;
use larder_core::Digest;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Method, Request, Response, StatusCode, Url};
use std::sync::Arc;

/// Default `Accept` for manifest fetches.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Headers a proxy must not forward upstream: the RFC 7230 §6.1
/// hop-by-hop set, plus `authorization` (owned by the token layer) and
/// `host` (owned by the transport).
const DROPPED_HEADERS: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "authorization",
    "host",
];

/// Whether a header must be dropped when forwarding.
pub fn is_dropped_header(name: &str) -> bool {
    DROPPED_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Copy end-to-end headers from a downstream request onto an upstream
/// one, dropping the hop-by-hop set.
pub fn copy_forward_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        if is_dropped_header(name.as_str()) {
            continue;
        }
        dst.append(name.clone(), value.clone());
    }
}

/// Client for one upstream registry, layered over a [`Transport`] chain.
pub struct RegistryClient {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl RegistryClient {
    /// Create a client for a registry base URL (scheme + host, no
    /// trailing slash).
    pub fn new(base_url: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        headers: Option<&HeaderMap>,
    ) -> UpstreamResult<Request> {
        let raw = format!("{}{}", self.base_url, path);
        let url = Url::parse(&raw).map_err(|e| UpstreamError::InvalidUrl {
            url: raw,
            reason: e.to_string(),
        })?;
        let mut request = Request::new(method, url);
        if let Some(src) = headers {
            copy_forward_headers(request.headers_mut(), src);
        }
        Ok(request)
    }

    /// Check that the registry speaks v2.
    pub async fn ping(&self) -> UpstreamResult<()> {
        let request = self.request(Method::GET, "/v2/", None)?;
        let response = self.transport.execute(request).await?;
        if response.status() != StatusCode::OK {
            return Err(UpstreamError::Ping(response.status().as_u16()));
        }
        Ok(())
    }

    /// Fetch a manifest by tag or digest. Falls back to the OCI image
    /// manifest media type when the caller provides no `Accept`.
    pub async fn fetch_manifest(
        &self,
        repo: &str,
        reference: &str,
        headers: &HeaderMap,
    ) -> UpstreamResult<Response> {
        let mut request = self.request(
            Method::GET,
            &format!("/v2/{repo}/manifests/{reference}"),
            Some(headers),
        )?;
        if !request.headers().contains_key(ACCEPT) {
            request
                .headers_mut()
                .insert(ACCEPT, HeaderValue::from_static(OCI_MANIFEST_MEDIA_TYPE));
        }
        self.transport.execute(request).await
    }

    /// HEAD a manifest.
    pub async fn head_manifest(
        &self,
        repo: &str,
        reference: &str,
        headers: &HeaderMap,
    ) -> UpstreamResult<Response> {
        let request = self.request(
            Method::HEAD,
            &format!("/v2/{repo}/manifests/{reference}"),
            Some(headers),
        )?;
        self.transport.execute(request).await
    }

    /// Fetch a blob by digest. The caller owns the response body.
    pub async fn fetch_blob(
        &self,
        repo: &str,
        digest: &Digest,
        headers: &HeaderMap,
    ) -> UpstreamResult<Response> {
        let request = self.request(
            Method::GET,
            &format!("/v2/{repo}/blobs/{digest}"),
            Some(headers),
        )?;
        self.transport.execute(request).await
    }

    /// Forward an arbitrary downstream request to an upstream path,
    /// preserving end-to-end headers.
    pub async fn forward(
        &self,
        method: Method,
        upstream_path: &str,
        headers: &HeaderMap,
    ) -> UpstreamResult<Response> {
        let request = self.request(method, upstream_path, Some(headers))?;
        self.transport.execute(request).await
    }
}
