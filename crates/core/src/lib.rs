//! Core domain types for the larder pull-through artifact cache.
//!
//! This crate defines the canonical data model used across all other
//! crates:
//! - Content digests and incremental hashing
//! - Repository name and reference grammar
//! - OCI v2 URL parsing and upstream rewriting
//! - Per-registry namespace policy
//! - Repo-key configuration and its concurrent store

pub mod config;
pub mod digest;
pub mod error;
pub mod name;
pub mod reference;
pub mod repo;
pub mod resolver;
pub mod url;

pub use config::{AppConfig, CacheConfig, RemoteConfig, ServerConfig};
pub use digest::{Algorithm, Digest, Hasher};
pub use error::{Error, Result};
pub use name::RepositoryName;
pub use reference::Reference;
pub use repo::{PackageType, RepoConfig, RepoConfigStore};
pub use resolver::NamespaceResolver;
pub use url::{OciUrl, Subresource};
