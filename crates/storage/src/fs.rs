//! Filesystem-backed blob store.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, BlobWrite, ByteStream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use larder_core::{Digest, Hasher};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Content-addressed blob store on the local filesystem.
///
/// Blobs live at `<base>/<hex[0..2]>/<hex[2..]>`; the two-character
/// prefix bounds directory fan-out. Atomic writes stage at
/// `<base>/<hex>.partial` and rename into place.
pub struct FsBlobStore {
    base: PathBuf,
}

impl FsBlobStore {
    /// Create a blob store rooted at `base`, creating the directory if
    /// needed.
    pub async fn new(base: impl AsRef<Path>) -> StorageResult<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        Ok(Self { base })
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.hex();
        self.base.join(&hex[..2]).join(&hex[2..])
    }

    fn partial_path(&self, digest: &Digest) -> PathBuf {
        self.base.join(format!("{}.partial", digest.hex()))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn exists(&self, digest: &Digest) -> StorageResult<bool> {
        fs::try_exists(self.blob_path(digest))
            .await
            .map_err(StorageError::Io)
    }

    async fn get(&self, digest: &Digest) -> StorageResult<ByteStream> {
        let path = self.blob_path(digest);
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(digest.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    async fn put(&self, digest: &Digest, mut data: ByteStream) -> StorageResult<u64> {
        let path = self.blob_path(digest);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        let mut written = 0u64;
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn writer(&self, expected: &Digest) -> StorageResult<Box<dyn BlobWrite>> {
        let path = self.blob_path(expected);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = fs::File::create(&path).await?;
        Ok(Box::new(VerifyingWriter {
            file,
            hasher: Hasher::new(),
            expected: expected.clone(),
            written: 0,
        }))
    }

    async fn writer_atomic(&self, expected: &Digest) -> StorageResult<Box<dyn BlobWrite>> {
        let partial = self.partial_path(expected);
        let file = fs::File::create(&partial).await?;
        Ok(Box::new(AtomicWriter {
            file: Some(file),
            partial,
            target: self.blob_path(expected),
            hasher: Some(Hasher::new()),
            expected: expected.clone(),
            written: 0,
            committed: false,
        }))
    }
}

/// Writer that streams to the final content path and verifies the digest
/// on finish. The mismatch path leaves the file for observability.
struct VerifyingWriter {
    file: fs::File,
    hasher: Hasher,
    expected: Digest,
    written: u64,
}

#[async_trait]
impl BlobWrite for VerifyingWriter {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.hasher.update(&chunk);
        self.file.write_all(&chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        self.file.flush().await?;
        drop(self.file);
        let actual = self.hasher.finalize();
        if actual != self.expected {
            return Err(StorageError::DigestMismatch {
                expected: self.expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(self.written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        self.file.flush().await?;
        Ok(())
    }
}

/// Writer that stages at `<base>/<hex>.partial` and renames into place on
/// finish. Dropping the writer before a successful finish removes the
/// partial file.
struct AtomicWriter {
    file: Option<fs::File>,
    partial: PathBuf,
    target: PathBuf,
    hasher: Option<Hasher>,
    expected: Digest,
    written: u64,
    committed: bool,
}

impl AtomicWriter {
    async fn remove_partial(&self) {
        if let Err(e) = fs::remove_file(&self.partial).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.partial.display(), error = %e, "failed to remove partial blob");
        }
    }
}

#[async_trait]
impl BlobWrite for AtomicWriter {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&chunk);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(&chunk).await?;
        }
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }

        let actual = self.hasher.take().map(Hasher::finalize);
        if actual.as_ref() != Some(&self.expected) {
            self.remove_partial().await;
            return Err(StorageError::DigestMismatch {
                expected: self.expected.to_string(),
                actual: actual.map(|d| d.to_string()).unwrap_or_default(),
            });
        }

        if let Some(parent) = self.target.parent()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            self.remove_partial().await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&self.partial, &self.target).await {
            self.remove_partial().await;
            return Err(e.into());
        }

        self.committed = true;
        Ok(self.written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        drop(self.file.take());
        self.remove_partial().await;
        self.committed = true;
        Ok(())
    }
}

impl Drop for AtomicWriter {
    fn drop(&mut self) {
        // Cancellation safety: a writer dropped mid-stream must not leak
        // its partial file.
        if !self.committed {
            let _ = std::fs::remove_file(&self.partial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::tempdir;

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    fn byte_stream(data: &'static [u8]) -> ByteStream {
        Box::pin(futures::stream::once(async move {
            Ok(Bytes::from_static(data))
        }))
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let temp = tempdir().unwrap();
        let store = FsBlobStore::new(temp.path()).await.unwrap();
        let data = b"hello world";
        let digest = Digest::of(data);

        assert!(!store.exists(&digest).await.unwrap());
        let written = store.put(&digest, byte_stream(data)).await.unwrap();
        assert_eq!(written, data.len() as u64);

        assert!(store.exists(&digest).await.unwrap());
        assert_eq!(collect(store.get(&digest).await.unwrap()).await, data);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let temp = tempdir().unwrap();
        let store = FsBlobStore::new(temp.path()).await.unwrap();
        let digest = Digest::of(b"missing");
        match store.get(&digest).await {
            Err(StorageError::NotFound(_)) => {}
            Err(e) => panic!("expected NotFound, got Err({e:?})"),
            Ok(_) => panic!("expected NotFound, got Ok"),
        }
    }

    #[tokio::test]
    async fn blob_layout_is_sharded() {
        let temp = tempdir().unwrap();
        let store = FsBlobStore::new(temp.path()).await.unwrap();
        let data = b"sharded";
        let digest = Digest::of(data);
        store.put(&digest, byte_stream(data)).await.unwrap();

        let hex = digest.hex();
        let expected = temp.path().join(&hex[..2]).join(&hex[2..]);
        assert!(expected.is_file());
    }

    #[tokio::test]
    async fn verifying_writer_accepts_matching_digest() {
        let temp = tempdir().unwrap();
        let store = FsBlobStore::new(temp.path()).await.unwrap();
        let data = b"verified content";
        let digest = Digest::of(data);

        let mut writer = store.writer(&digest).await.unwrap();
        writer.write(Bytes::from_static(data)).await.unwrap();
        assert_eq!(writer.finish().await.unwrap(), data.len() as u64);

        assert_eq!(collect(store.get(&digest).await.unwrap()).await, data);
    }

    #[tokio::test]
    async fn verifying_writer_rejects_mismatch() {
        let temp = tempdir().unwrap();
        let store = FsBlobStore::new(temp.path()).await.unwrap();
        let wrong = Digest::of(b"expected content");

        let mut writer = store.writer(&wrong).await.unwrap();
        writer.write(Bytes::from_static(b"actual content")).await.unwrap();
        match writer.finish().await {
            Err(StorageError::DigestMismatch { .. }) => {}
            other => panic!("expected DigestMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn atomic_writer_publishes_on_finish() {
        let temp = tempdir().unwrap();
        let store = FsBlobStore::new(temp.path()).await.unwrap();
        let data = b"atomic content";
        let digest = Digest::of(data);

        let mut writer = store.writer_atomic(&digest).await.unwrap();
        writer.write(Bytes::from_static(data)).await.unwrap();

        // Not visible until finish.
        assert!(!store.exists(&digest).await.unwrap());
        writer.finish().await.unwrap();
        assert!(store.exists(&digest).await.unwrap());
        assert_eq!(collect(store.get(&digest).await.unwrap()).await, data);

        // No partial file remains.
        assert!(!temp.path().join(format!("{}.partial", digest.hex())).exists());
    }

    #[tokio::test]
    async fn atomic_writer_mismatch_publishes_nothing() {
        let temp = tempdir().unwrap();
        let store = FsBlobStore::new(temp.path()).await.unwrap();
        let wrong = Digest::of(b"what upstream promised");

        let mut writer = store.writer_atomic(&wrong).await.unwrap();
        writer.write(Bytes::from_static(b"what upstream sent")).await.unwrap();
        match writer.finish().await {
            Err(StorageError::DigestMismatch { .. }) => {}
            other => panic!("expected DigestMismatch, got {other:?}"),
        }

        assert!(!store.exists(&wrong).await.unwrap());
        assert!(!temp.path().join(format!("{}.partial", wrong.hex())).exists());
    }

    #[tokio::test]
    async fn atomic_writer_abort_removes_partial() {
        let temp = tempdir().unwrap();
        let store = FsBlobStore::new(temp.path()).await.unwrap();
        let digest = Digest::of(b"aborted");

        let mut writer = store.writer_atomic(&digest).await.unwrap();
        writer.write(Bytes::from_static(b"abo")).await.unwrap();
        writer.abort().await.unwrap();

        assert!(!store.exists(&digest).await.unwrap());
        assert!(!temp.path().join(format!("{}.partial", digest.hex())).exists());
    }

    #[tokio::test]
    async fn atomic_writer_drop_removes_partial() {
        let temp = tempdir().unwrap();
        let store = FsBlobStore::new(temp.path()).await.unwrap();
        let digest = Digest::of(b"dropped mid-stream");

        let mut writer = store.writer_atomic(&digest).await.unwrap();
        writer.write(Bytes::from_static(b"dropped")).await.unwrap();
        drop(writer);

        assert!(!temp.path().join(format!("{}.partial", digest.hex())).exists());
        assert!(!store.exists(&digest).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_atomic_writers_same_digest() {
        let temp = tempdir().unwrap();
        let store = std::sync::Arc::new(FsBlobStore::new(temp.path()).await.unwrap());
        let data = Bytes::from_static(b"identical by construction");
        let digest = Digest::of(&data);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let data = data.clone();
            let digest = digest.clone();
            handles.push(tokio::spawn(async move {
                let mut writer = store.writer_atomic(&digest).await.unwrap();
                writer.write(data).await.unwrap();
                writer.finish().await
            }));
        }

        // Losers of the rename race may observe a missing partial file;
        // at least one writer must succeed and the committed blob must be
        // whole.
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert!(successes >= 1);
        assert_eq!(
            collect(store.get(&digest).await.unwrap()).await,
            b"identical by construction"
        );
    }
}
