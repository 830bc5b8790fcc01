use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Blob, BlobError, BlobId, BlobStore};
use crate::common::cleanup::remove_stale_entries;

/// Blob store on a local (or mounted) filesystem.
///
/// Layout:
/// - `{root}/blobs/{aa}/{sha256}` sealed blobs
/// - `{root}/tmp/{uuid}.part` in-flight writes, never read
#[derive(Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("blobs")).await?;
        fs::create_dir_all(root.join("tmp")).await?;

        info!("✅ Blob store ready at {}", root.display());
        Ok(Self { root })
    }

    /// Delete in-flight writes older than `older_than`, left by a crashed writer.
    pub async fn sweep_stale(&self, older_than: Duration) -> Result<usize, BlobError> {
        let removed = remove_stale_entries(&self.root.join("tmp"), older_than, |_| true).await?;
        if removed > 0 {
            info!("🧹 Removed {} abandoned blob writes", removed);
        }
        Ok(removed)
    }

    fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.root.join("blobs").join(id.shard()).join(id.as_str())
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join("tmp").join(format!("{}.part", Uuid::new_v4()))
    }

    async fn write_sealed(&self, id: &BlobId, data: &[u8]) -> Result<(), BlobError> {
        let temp = self.temp_path();

        let result = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);

            let final_path = self.blob_path(id);
            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&temp, &final_path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp).await;
        }
        result.map_err(BlobError::from)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, data: Bytes) -> Result<Blob, BlobError> {
        let id = BlobId::for_bytes(&data);

        if self.exists(&id).await? {
            debug!("Blob {} already sealed, reusing", id);
            return self.stat(&id).await;
        }

        self.write_sealed(&id, &data).await?;
        debug!("Sealed blob {} ({} bytes)", id, data.len());
        self.stat(&id).await
    }

    async fn get(&self, id: &BlobId) -> Result<Bytes, BlobError> {
        match fs::read(self.blob_path(id)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::NotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, id: &BlobId) -> Result<bool, BlobError> {
        Ok(fs::try_exists(self.blob_path(id)).await?)
    }

    async fn stat(&self, id: &BlobId) -> Result<Blob, BlobError> {
        let meta = match fs::metadata(self.blob_path(id)).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(BlobError::NotFound(id.clone())),
            Err(e) => return Err(e.into()),
        };

        let created_at = meta
            .modified()
            .map(OffsetDateTime::from)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        Ok(Blob {
            blob_id: id.clone(),
            size: meta.len(),
            content_hash: id.to_string(),
            created_at,
        })
    }
}
