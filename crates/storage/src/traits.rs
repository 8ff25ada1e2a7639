//! Blob store trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use larder_core::Digest;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Durable, content-verified storage for opaque binary objects keyed by
/// digest.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Check whether a blob is present.
    async fn exists(&self, digest: &Digest) -> StorageResult<bool>;

    /// Open a blob for streaming reads.
    async fn get(&self, digest: &Digest) -> StorageResult<ByteStream>;

    /// Store a pre-verified stream directly at the content path, without
    /// digest verification. Returns the number of bytes written.
    ///
    /// Retained for callers that hash before committing (mirror spools);
    /// new code paths should use [`BlobStore::writer_atomic`].
    async fn put(&self, digest: &Digest, data: ByteStream) -> StorageResult<u64>;

    /// A sink that verifies the digest of everything written when it is
    /// finished. Bytes land directly at the final content path; on
    /// mismatch the partial file is left in place and its content is
    /// undefined to readers.
    async fn writer(&self, expected: &Digest) -> StorageResult<Box<dyn BlobWrite>>;

    /// A sink that stages to a `.partial` file and renames into place on
    /// a successful finish. The rename is the point at which the blob
    /// becomes visible to concurrent `exists`/`get` calls; any failure
    /// (including drop before finish) removes the partial file.
    async fn writer_atomic(&self, expected: &Digest) -> StorageResult<Box<dyn BlobWrite>>;
}

/// Streaming blob write handle.
#[async_trait]
pub trait BlobWrite: Send {
    /// Write a chunk of data.
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()>;

    /// Finish the write, running digest verification. Returns the total
    /// bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abandon the write.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
