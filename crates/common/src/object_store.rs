use std::future::Future;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::debug;

/// Write-once raw payload archive.
///
/// Keys are `/`-separated relative paths such as
/// `20240102/transfers/0xabc.json`.
pub trait ObjectStore: Send + Sync {
    /// Create the bucket if it does not exist. Idempotent.
    fn ensure_bucket(&self) -> impl Future<Output = Result<()>> + Send;

    /// Serialize `value` as JSON and store it under `key`, replacing any
    /// existing object.
    fn put_json(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Filesystem-backed store: the bucket is a directory under `root`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    bucket_dir: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl AsRef<Path>, bucket: &str) -> Self {
        Self {
            bucket_dir: root.as_ref().join(bucket),
        }
    }

    pub fn from_config(cfg: &crate::config::ObjectStore) -> Self {
        Self::new(&cfg.root, &cfg.bucket)
    }

    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if key.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("invalid object key {key:?}");
        }
        Ok(self.bucket_dir.join(rel))
    }
}

impl ObjectStore for FsObjectStore {
    async fn ensure_bucket(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.bucket_dir)
            .await
            .with_context(|| format!("create bucket dir {}", self.bucket_dir.display()))
    }

    async fn put_json(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let path = self.object_path(key)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.bucket_dir.clone());
        tokio::fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("create dir {}", parent.display()))?;
        let bytes = serde_json::to_vec(value)?;
        let len = bytes.len();

        // Each write gets its own sibling temp file; the rename is atomic, so
        // concurrent writers of one key never see a torn or missing object.
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&parent)
                .with_context(|| format!("create temp file in {}", parent.display()))?;
            tmp.write_all(&bytes)
                .with_context(|| format!("write temp file for {}", path.display()))?;
            tmp.persist(&path)
                .with_context(|| format!("rename into {}", path.display()))?;
            Ok(())
        })
        .await
        .context("archive writer task failed")??;

        debug!(key, bytes = len, "archived object");
        Ok(())
    }
}
