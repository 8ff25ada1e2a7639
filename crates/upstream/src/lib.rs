//! Upstream registry access for the larder pull-through artifact cache.
//!
//! This crate provides:
//! - `WWW-Authenticate: Bearer` challenge parsing
//! - A scope-keyed token cache with TTL and a background pruner
//! - A composable transport chain (basic auth, bearer token, tracing)
//! - A typed client over the OCI distribution v2 API

pub mod challenge;
pub mod client;
pub mod error;
pub mod token;
pub mod transport;

pub use challenge::Challenge;
pub use client::{OCI_MANIFEST_MEDIA_TYPE, RegistryClient, copy_forward_headers, is_dropped_header};
pub use error::{UpstreamError, UpstreamResult};
pub use token::{DEFAULT_CLEANUP_INTERVAL, DEFAULT_TOKEN_TTL, TokenCache, TokenKey, spawn_pruner};
pub use transport::{
    BasicAuthTransport, HttpTransport, TokenTransport, TracingTransport, Transport,
    default_client, transport_chain,
};
