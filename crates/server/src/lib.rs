//! HTTP front end for the larder pull-through artifact cache.
//!
//! This crate provides:
//! - The OCI v2 pull-through surface (`/v2/...`)
//! - Debian and Helm mirror adapters (`/debian/...`, `/helm/...`)
//! - Request-correlation middleware
//! - The `larderd` binary

pub mod error;
pub mod handlers;
pub mod mw;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use mw::{CORRELATION_ID_HEADER, CorrelationId};
pub use routes::create_router;
pub use state::AppState;
