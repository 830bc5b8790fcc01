use std::sync::Arc;

use tracing::info;

use crate::config::settings::{AppConfig, BlobBackend};
use crate::infrastructure::db::pool::connect_to_db;
use crate::infrastructure::ledger::file::FileJobLedger;
use crate::infrastructure::ledger::postgres::PgJobLedger;
use crate::infrastructure::ledger::JobLedger;
use crate::infrastructure::queue::channel::JobQueue;
use crate::infrastructure::storage::local::LocalBlobStore;
use crate::infrastructure::storage::s3::S3BlobStore;
use crate::infrastructure::storage::BlobStore;
use crate::workers::ffmpeg::{FfmpegTranscoder, Transcoder};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub ledger: Arc<dyn JobLedger>,
    pub blobs: Arc<dyn BlobStore>,
    pub transcoder: Arc<dyn Transcoder>,
    pub queue: JobQueue,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        ledger: Arc<dyn JobLedger>,
        blobs: Arc<dyn BlobStore>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            ledger,
            blobs,
            transcoder,
            queue: JobQueue::new(),
        }
    }

    /// Build the backends selected by `config`.
    ///
    /// Local temporaries untouched for a whole job timeout are swept first.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let stale_after = config.job_timeout;

        let ledger: Arc<dyn JobLedger> = match &config.database_url {
            Some(url) => Arc::new(PgJobLedger::new(connect_to_db(url).await?)),
            None => Arc::new(FileJobLedger::open(&config.storage_root).await?),
        };

        let blobs: Arc<dyn BlobStore> = match (config.blob_backend, &config.s3) {
            (BlobBackend::S3, Some(s3)) => Arc::new(S3BlobStore::new(
                &s3.endpoint,
                &s3.bucket,
                &s3.access_key,
                &s3.secret_key,
            )),
            _ => {
                let store = LocalBlobStore::open(&config.storage_root).await?;
                store.sweep_stale(stale_after).await?;
                Arc::new(store)
            }
        };

        let transcoder = FfmpegTranscoder::new(config.ffmpeg_path.clone(), config.scratch_dir())
            .with_base_args(config.ffmpeg_global_args.iter().cloned());
        transcoder.sweep_scratch(stale_after).await?;
        let transcoder = Arc::new(transcoder);
        info!("🎞️ Using '{}' for transcoding", config.ffmpeg_path);

        Ok(Self::new(config, ledger, blobs, transcoder))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;

    use super::*;

    /// Local backends under `root` with the given tool.
    pub(crate) async fn local_state(root: &Path, transcoder: Arc<dyn Transcoder>) -> AppState {
        local_state_with(AppConfig::for_tests(root), transcoder).await
    }

    pub(crate) async fn local_state_with(config: AppConfig, transcoder: Arc<dyn Transcoder>) -> AppState {
        let ledger = FileJobLedger::open(&config.storage_root).await.unwrap();
        let blobs = LocalBlobStore::open(&config.storage_root).await.unwrap();
        AppState::new(config, Arc::new(ledger), Arc::new(blobs), transcoder)
    }

    #[tokio::test]
    async fn startup_sweeps_crash_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("tmp")).unwrap();
        std::fs::create_dir_all(root.join("scratch/dead-invocation")).unwrap();
        std::fs::create_dir_all(root.join("jobs")).unwrap();
        std::fs::write(root.join("tmp/crashed.part"), b"partial").unwrap();
        std::fs::write(root.join("scratch/dead-invocation/input.mp4"), b"staged").unwrap();
        std::fs::write(root.join("jobs/x.y.tmp"), b"{").unwrap();

        let mut config = AppConfig::for_tests(root);
        config.job_timeout = std::time::Duration::ZERO;
        let state = AppState::from_config(config).await.unwrap();

        assert!(!root.join("tmp/crashed.part").exists());
        assert!(!root.join("scratch/dead-invocation").exists());
        assert!(!root.join("jobs/x.y.tmp").exists());
        assert!(state.queue.is_empty());
    }
}
