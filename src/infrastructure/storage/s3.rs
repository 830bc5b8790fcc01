use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::{Blob, BlobError, BlobId, BlobStore};

/// Blob store backed by an S3-compatible bucket (MinIO in local deployments).
///
/// A single `PutObject` is atomic, so a blob is either fully visible under
/// `blobs/{sha256}` or not at all.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(endpoint: &str, bucket: &str, access_key: &str, secret_key: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("✅ Blob store using S3 bucket '{}' at {}", bucket, endpoint);

        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    fn key(id: &BlobId) -> String {
        format!("blobs/{}", id)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, data: Bytes) -> Result<Blob, BlobError> {
        let id = BlobId::for_bytes(&data);

        if self.exists(&id).await? {
            debug!("Blob {} already in bucket, reusing", id);
            return self.stat(&id).await;
        }

        let size = data.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::key(&id))
            .body(ByteStream::from(data))
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| BlobError::Unavailable(format!("put_object failed: {}", e)))?;

        Ok(Blob {
            content_hash: id.to_string(),
            blob_id: id,
            size,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    async fn get(&self, id: &BlobId) -> Result<Bytes, BlobError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key(id))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    BlobError::NotFound(id.clone())
                } else {
                    BlobError::Unavailable(format!("get_object failed: {}", e))
                }
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| BlobError::Unavailable(format!("Failed to read object body: {}", e)))?;

        Ok(data.into_bytes())
    }

    async fn exists(&self, id: &BlobId) -> Result<bool, BlobError> {
        match self.stat(id).await {
            Ok(_) => Ok(true),
            Err(BlobError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stat(&self, id: &BlobId) -> Result<Blob, BlobError> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(Self::key(id))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    BlobError::NotFound(id.clone())
                } else {
                    BlobError::Unavailable(format!("head_object failed: {}", e))
                }
            })?;

        let created_at = head
            .last_modified()
            .and_then(|t| OffsetDateTime::from_unix_timestamp(t.secs()).ok())
            .unwrap_or_else(OffsetDateTime::now_utc);

        Ok(Blob {
            blob_id: id.clone(),
            size: head.content_length().unwrap_or_default().max(0) as u64,
            content_hash: id.to_string(),
            created_at,
        })
    }
}
