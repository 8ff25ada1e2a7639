//! Content-addressed storage for the larder pull-through artifact cache.
//!
//! This crate provides:
//! - The [`BlobStore`] trait with verifying and atomic write handles
//! - A local filesystem backend with two-character prefix sharding
//! - A path → digest index for mirrors that are not digest-addressed
//! - Spool files for single-pass hash-while-streaming downloads

pub mod error;
pub mod fs;
pub mod index;
pub mod spool;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use fs::FsBlobStore;
pub use index::PathIndex;
pub use spool::{SealedSpool, Spool};
pub use traits::{BlobStore, BlobWrite, ByteStream};
