//! Upstream client error types.

use thiserror::Error;

/// Errors from talking to upstream registries and token endpoints.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unsupported auth scheme in challenge")]
    UnsupportedScheme,

    #[error("missing realm in challenge")]
    MissingRealm,

    #[error("invalid realm URL {realm:?}: {reason}")]
    InvalidRealm { realm: String, reason: String },

    #[error("invalid upstream URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("token endpoint returned {0}")]
    TokenEndpoint(u16),

    #[error("token response too large")]
    TokenBodyTooLarge,

    #[error("malformed token response: {0}")]
    TokenDecode(String),

    #[error("no token in response")]
    MissingToken,

    #[error("registry ping failed: {0}")]
    Ping(u16),

    #[error("invalid header value: {0}")]
    InvalidHeader(String),
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;
