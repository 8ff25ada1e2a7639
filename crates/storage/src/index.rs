//! Path → digest index for mirrors whose objects are not digest-addressed
//! on the wire.
//!
//! Each cached path gets one small file under
//! `<base>/<repo_key>/<path>` containing the canonical digest string of
//! the blob holding its content.

use crate::error::{StorageError, StorageResult};
use larder_core::Digest;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Filesystem-backed path index.
pub struct PathIndex {
    base: PathBuf,
}

impl PathIndex {
    /// Create an index rooted at `base`, creating the directory if needed.
    pub async fn new(base: impl AsRef<Path>) -> StorageResult<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        Ok(Self { base })
    }

    /// Resolve an entry path, rejecting anything that could escape the
    /// index root.
    fn entry_path(&self, repo_key: &str, rel_path: &str) -> StorageResult<PathBuf> {
        for part in [repo_key, rel_path] {
            if part.is_empty() {
                return Err(StorageError::InvalidKey("empty path".to_string()));
            }
            for component in Path::new(part).components() {
                match component {
                    Component::Normal(_) => {}
                    _ => {
                        return Err(StorageError::InvalidKey(format!(
                            "unsafe path component in {part:?}"
                        )));
                    }
                }
            }
        }
        Ok(self.base.join(repo_key).join(rel_path))
    }

    /// Look up the digest recorded for a path, if any.
    pub async fn get(&self, repo_key: &str, rel_path: &str) -> StorageResult<Option<Digest>> {
        let path = self.entry_path(repo_key, rel_path)?;
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let digest = Digest::parse(raw.trim())
            .map_err(|e| StorageError::CorruptIndex(format!("{}: {e}", path.display())))?;
        Ok(Some(digest))
    }

    /// Record the digest for a path. The entry file is written to a
    /// temporary name and renamed into place.
    pub async fn put(&self, repo_key: &str, rel_path: &str, digest: &Digest) -> StorageResult<()> {
        let path = self.entry_path(repo_key, rel_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(format!("{digest}\n").as_bytes()).await?;
            file.flush().await?;
        }
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Whether an entry exists for a path.
    pub async fn exists(&self, repo_key: &str, rel_path: &str) -> StorageResult<bool> {
        let path = self.entry_path(repo_key, rel_path)?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }
}
