//! Composable upstream transports.
//!
//! A [`Transport`] plays the role of an HTTP round-tripper: it takes a
//! fully built request and returns the response. Layers wrap an inner
//! transport, composed inner → outer as base HTTP → basic auth (when the
//! repo has static credentials) → bearer token → tracing.

use crate::challenge::Challenge;
use crate::error::{UpstreamError, UpstreamResult};
use crate::token::{DEFAULT_TOKEN_TTL, TokenCache, TokenKey};
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Maximum token endpoint response body (1 MiB).
const MAX_TOKEN_BODY: usize = 1 << 20;

/// An HTTP round-trip seam.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: Request) -> UpstreamResult<Response>;
}

/// Build the shared upstream HTTP client.
///
/// Compression is left off because registry blobs are already
/// compressed; decoding them again wastes CPU on both ends.
pub fn default_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(10))
        .read_timeout(Duration::from_secs(15))
        .build()
}

/// The base transport: a plain `reqwest::Client`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: Request) -> UpstreamResult<Response> {
        Ok(self.client.execute(request).await?)
    }
}

/// Adds `Authorization: Basic …` to every request.
pub struct BasicAuthTransport {
    inner: Arc<dyn Transport>,
    header: HeaderValue,
}

impl BasicAuthTransport {
    pub fn new(
        inner: Arc<dyn Transport>,
        username: &str,
        password: &str,
    ) -> UpstreamResult<Self> {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        let mut header = HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|e| UpstreamError::InvalidHeader(e.to_string()))?;
        header.set_sensitive(true);
        Ok(Self { inner, header })
    }
}

#[async_trait]
impl Transport for BasicAuthTransport {
    async fn execute(&self, mut request: Request) -> UpstreamResult<Response> {
        // A bearer retry from the token layer re-enters this layer and
        // must keep its Authorization header.
        if !request.headers().contains_key(AUTHORIZATION) {
            request
                .headers_mut()
                .insert(AUTHORIZATION, self.header.clone());
        }
        self.inner.execute(request).await
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// Transparently satisfies `WWW-Authenticate: Bearer` challenges.
///
/// A 401 from the inner transport triggers one token acquisition (served
/// from the scope-keyed cache when possible) and one retry; a second 401
/// is returned verbatim.
pub struct TokenTransport {
    inner: Arc<dyn Transport>,
    cache: Arc<TokenCache>,
    token_client: reqwest::Client,
    username: Option<String>,
    password: Option<String>,
}

impl TokenTransport {
    pub fn new(
        inner: Arc<dyn Transport>,
        cache: Arc<TokenCache>,
        token_client: reqwest::Client,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            inner,
            cache,
            token_client,
            username,
            password,
        }
    }

    async fn fetch_token(&self, challenge: &Challenge) -> UpstreamResult<String> {
        let key = TokenKey::new(challenge.service.as_deref(), &challenge.scopes);
        if let Some(token) = self.cache.get(&key) {
            tracing::debug!(service = ?challenge.service, "token cache hit");
            return Ok(token);
        }

        let url = challenge.token_url()?;
        let mut request = self.token_client.get(url);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(UpstreamError::TokenEndpoint(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        if body.len() > MAX_TOKEN_BODY {
            return Err(UpstreamError::TokenBodyTooLarge);
        }
        let decoded: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| UpstreamError::TokenDecode(e.to_string()))?;

        let token = decoded
            .token
            .filter(|t| !t.is_empty())
            .or(decoded.access_token.filter(|t| !t.is_empty()))
            .ok_or(UpstreamError::MissingToken)?;

        let ttl = match decoded.expires_in {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
            _ => DEFAULT_TOKEN_TTL,
        };
        self.cache.insert(key, token.clone(), ttl);
        Ok(token)
    }
}

#[async_trait]
impl Transport for TokenTransport {
    async fn execute(&self, request: Request) -> UpstreamResult<Response> {
        let retry = request.try_clone();
        let response = self.inner.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(mut retry) = retry else {
            // Streaming bodies cannot be replayed; hand the 401 back.
            return Ok(response);
        };

        // The last parseable challenge wins.
        let mut challenge = None;
        for value in response.headers().get_all(WWW_AUTHENTICATE) {
            if let Ok(header) = value.to_str()
                && let Ok(parsed) = Challenge::parse(header)
            {
                challenge = Some(parsed);
            }
        }
        let Some(challenge) = challenge else {
            return Err(UpstreamError::MissingRealm);
        };
        drop(response);

        let token = self.fetch_token(&challenge).await?;
        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| UpstreamError::InvalidHeader(e.to_string()))?;
        bearer.set_sensitive(true);
        retry.headers_mut().insert(AUTHORIZATION, bearer);
        self.inner.execute(retry).await
    }
}

/// Logs one line per upstream round trip.
pub struct TracingTransport {
    inner: Arc<dyn Transport>,
}

impl TracingTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for TracingTransport {
    async fn execute(&self, request: Request) -> UpstreamResult<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        let start = Instant::now();

        match self.inner.execute(request).await {
            Ok(response) => {
                tracing::info!(
                    %method,
                    %url,
                    status = response.status().as_u16(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "upstream request"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    %method,
                    %url,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %e,
                    "upstream request failed"
                );
                Err(e)
            }
        }
    }
}

/// Compose the transport chain for one upstream, inner → outer:
/// base HTTP → basic auth (iff credentials) → bearer token → tracing
/// (iff enabled).
pub fn transport_chain(
    client: reqwest::Client,
    credentials: Option<(String, String)>,
    cache: Arc<TokenCache>,
    trace: bool,
) -> UpstreamResult<Arc<dyn Transport>> {
    let mut transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(client.clone()));

    if let Some((username, password)) = &credentials {
        transport = Arc::new(BasicAuthTransport::new(transport, username, password)?);
    }

    let (username, password) = match credentials {
        Some((u, p)) => (Some(u), Some(p)),
        None => (None, None),
    };
    transport = Arc::new(TokenTransport::new(
        transport, cache, client, username, password,
    ));

    if trace {
        transport = Arc::new(TracingTransport::new(transport));
    }
    Ok(transport)
}
