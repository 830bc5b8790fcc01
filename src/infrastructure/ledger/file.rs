use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::{JobLedger, LedgerError};
use crate::common::cleanup::remove_stale_entries;
use crate::infrastructure::storage::BlobId;
use crate::modules::jobs::format::MediaFormat;
use crate::modules::jobs::model::{Job, JobState, TransitionPayload};

/// Job ledger kept as one JSON document per job on the data volume.
///
/// Every mutation happens under a single lock and is written
/// temp-then-rename before the in-memory view is updated, so a crash never
/// leaves a half-written record and the view never runs ahead of disk.
/// Suitable for a single service process; use the postgres ledger to share
/// jobs between processes.
pub struct FileJobLedger {
    dir: PathBuf,
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl FileJobLedger {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let dir = root.as_ref().join("jobs");
        fs::create_dir_all(&dir).await?;

        // Single writer: any temp record still on disk belongs to a dead process.
        let stale = remove_stale_entries(&dir, Duration::ZERO, is_temp_record).await?;
        if stale > 0 {
            warn!("Removed {} unfinished job record writes", stale);
        }

        let mut jobs = HashMap::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let raw = fs::read(&path).await?;
            match serde_json::from_slice::<Job>(&raw) {
                Ok(job) => {
                    jobs.insert(job.job_id, job);
                }
                Err(e) => warn!("Skipping unreadable job record {}: {}", path.display(), e),
            }
        }

        info!("✅ Job ledger loaded {} jobs from {}", jobs.len(), dir.display());
        Ok(Self {
            dir,
            jobs: Mutex::new(jobs),
        })
    }

    async fn persist(&self, job: &Job) -> Result<(), LedgerError> {
        let data = serde_json::to_vec_pretty(job)
            .map_err(|e| LedgerError::Unavailable(format!("Failed to encode job: {}", e)))?;

        let final_path = self.dir.join(format!("{}.json", job.job_id));
        let temp_path = self.dir.join(format!("{}.{}.tmp", job.job_id, Uuid::new_v4()));

        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &final_path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result.map_err(LedgerError::from)
    }
}

fn is_temp_record(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("tmp")
}

#[async_trait]
impl JobLedger for FileJobLedger {
    async fn create(
        &self,
        input_ref: &BlobId,
        input_format: MediaFormat,
        max_attempts: u32,
    ) -> Result<Job, LedgerError> {
        let job = Job::new(
            input_ref.clone(),
            input_format,
            max_attempts,
            OffsetDateTime::now_utc(),
        );

        let mut jobs = self.jobs.lock().await;
        self.persist(&job).await?;
        jobs.insert(job.job_id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Job, LedgerError> {
        self.jobs
            .lock()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(LedgerError::NotFound(job_id))
    }

    async fn transition(
        &self,
        job_id: Uuid,
        from: JobState,
        to: JobState,
        payload: TransitionPayload,
    ) -> Result<Job, LedgerError> {
        let mut jobs = self.jobs.lock().await;
        let mut job = jobs.get(&job_id).cloned().ok_or(LedgerError::NotFound(job_id))?;

        job.apply(from, to, payload, OffsetDateTime::now_utc())?;
        self.persist(&job).await?;
        jobs.insert(job_id, job.clone());
        Ok(job)
    }

    async fn heartbeat(
        &self,
        job_id: Uuid,
        lease_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> Result<Job, LedgerError> {
        let mut jobs = self.jobs.lock().await;
        let mut job = jobs.get(&job_id).cloned().ok_or(LedgerError::NotFound(job_id))?;

        job.extend_lease(lease_id, expires_at)?;
        self.persist(&job).await?;
        jobs.insert(job_id, job.clone());
        Ok(job)
    }

    async fn list_in_state(&self, state: JobState) -> Result<Vec<Job>, LedgerError> {
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<Job> = jobs.values().filter(|j| j.state == state).cloned().collect();
        matching.sort_by_key(|j| j.created_at);
        Ok(matching)
    }
}
