use axum::{
    body::Bytes,
    extract::{multipart::Field, Multipart},
};
use futures_util::StreamExt;
use tracing::{debug, error};

use crate::common::error::JobError;

/// Multipart field that carries the submitted media.
pub const MEDIA_FIELD: &str = "media";

/// One uploaded file, fully buffered.
#[derive(Debug)]
pub struct MediaUpload {
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Find the `media` field and read it, rejecting bodies above `max_bytes`.
pub async fn read_media_field(multipart: &mut Multipart, max_bytes: usize) -> Result<MediaUpload, JobError> {
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| JobError::InvalidInput(format!("malformed multipart body: {}", e)))?
            .ok_or_else(|| JobError::InvalidInput(format!("missing '{}' field", MEDIA_FIELD)))?;

        if field.name() != Some(MEDIA_FIELD) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let data = collect_field(field, max_bytes).await?;
        return Ok(MediaUpload { content_type, data });
    }
}

async fn collect_field(mut field: Field<'_>, max_bytes: usize) -> Result<Bytes, JobError> {
    let mut buffer = Vec::new();

    while let Some(chunk) = field.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                error!("Stream error: {}", e);
                return Err(JobError::InvalidInput(format!("upload interrupted: {}", e)));
            }
        };

        if buffer.len() + chunk.len() > max_bytes {
            return Err(JobError::InvalidInput(format!(
                "media exceeds the {} byte limit",
                max_bytes
            )));
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(buffer))
}
