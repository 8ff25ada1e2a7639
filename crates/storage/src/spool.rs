//! Spool files for mirror downloads whose digest is unknown up front.
//!
//! The pool path of the Debian mirror streams an upstream body to the
//! client while writing it to a spool file and hashing it in the same
//! pass; once the body is complete the sealed spool is committed to the
//! blob store under the computed digest.

use crate::error::StorageResult;
use crate::traits::ByteStream;
use bytes::Bytes;
use larder_core::{Digest, Hasher};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// A spool file being written. Dropping an unsealed spool removes it.
pub struct Spool {
    file: Option<fs::File>,
    path: PathBuf,
    hasher: Option<Hasher>,
    written: u64,
    sealed: bool,
}

impl Spool {
    /// Create a spool file in `dir`, creating the directory if needed.
    pub async fn create(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let path = dir.join(format!(".spool.{}", Uuid::new_v4()));
        let file = fs::File::create(&path).await?;
        Ok(Self {
            file: Some(file),
            path,
            hasher: Some(Hasher::new()),
            written: 0,
            sealed: false,
        })
    }

    /// Append a chunk, feeding the digest in the same pass.
    pub async fn write(&mut self, chunk: &Bytes) -> StorageResult<()> {
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(chunk);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk).await?;
        }
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Finish writing and seal the spool, yielding its digest.
    pub async fn seal(mut self) -> StorageResult<SealedSpool> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        let digest = self
            .hasher
            .take()
            .map(Hasher::finalize)
            .unwrap_or_else(|| Digest::of(&[]));
        self.sealed = true;
        Ok(SealedSpool {
            path: std::mem::take(&mut self.path),
            digest,
            len: self.written,
            removed: false,
        })
    }
}

impl Drop for Spool {
    fn drop(&mut self) {
        if !self.sealed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// A fully written spool file. Dropping removes the file.
pub struct SealedSpool {
    path: PathBuf,
    digest: Digest,
    len: u64,
    removed: bool,
}

impl SealedSpool {
    /// Digest of the spooled content.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Spooled length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Open the spooled content for streaming reads.
    pub async fn open(&self) -> StorageResult<ByteStream> {
        let file = fs::File::open(&self.path).await?;
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

    /// Remove the spool file.
    pub async fn remove(mut self) -> StorageResult<()> {
        self.removed = true;
        fs::remove_file(&self.path).await?;
        Ok(())
    }
}

impl Drop for SealedSpool {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
