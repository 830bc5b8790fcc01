use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

use super::dto::{JobResult, JobStatsResponse, JobStatusResponse, SubmitJobResponse};
use super::format::MediaFormat;
use super::model::{JobState, TransitionPayload};
use crate::common::error::JobError;
use crate::state::AppState;

pub struct JobService;

impl JobService {
    /// Validate and store the input, record the job, hand it to the workers.
    ///
    /// Nothing is written when validation fails. The job row is written after
    /// the blob, so a storage failure leaves no job behind.
    pub async fn submit(
        state: AppState,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<SubmitJobResponse, JobError> {
        if data.is_empty() {
            return Err(JobError::InvalidInput("media payload is empty".to_string()));
        }
        if data.len() > state.config.max_upload_bytes {
            return Err(JobError::InvalidInput(format!(
                "media exceeds the {} byte limit",
                state.config.max_upload_bytes
            )));
        }

        let format = content_type
            .and_then(MediaFormat::from_content_type)
            .ok_or_else(|| {
                JobError::InvalidInput(format!(
                    "unsupported media type '{}'",
                    content_type.unwrap_or("none")
                ))
            })?;

        let blob = state.blobs.put(data).await?;
        let job = state
            .ledger
            .create(&blob.blob_id, format, state.config.max_attempts)
            .await?;

        state.queue.enqueue(job.job_id);
        info!(job_id = %job.job_id, input = %blob.blob_id, %format, size = blob.size, "📥 Job submitted");

        Ok(SubmitJobResponse { job_id: job.job_id })
    }

    pub async fn status(state: AppState, job_id: Uuid) -> Result<JobStatusResponse, JobError> {
        let job = state.ledger.get(job_id).await?;
        Ok(job.into())
    }

    /// Output bytes of a `done` job; every other state maps to its error.
    pub async fn result(state: AppState, job_id: Uuid) -> Result<JobResult, JobError> {
        let job = state.ledger.get(job_id).await?;

        match (job.state, job.output_ref, job.error) {
            (JobState::Done, Some(output_ref), _) => {
                let data = state.blobs.get(&output_ref).await?;
                Ok(JobResult {
                    content_type: job.input_format.output_profile().content_type,
                    data,
                })
            }
            (JobState::Queued | JobState::Running, _, _) => Err(JobError::NotReady(job.state)),
            (JobState::Failed, _, Some(failure)) => Err(JobError::Failed(failure)),
            (JobState::Canceled, _, _) => Err(JobError::Canceled(job_id)),
            (other, _, _) => Err(JobError::Storage(format!(
                "job {} is {} but its record is incomplete",
                job_id, other
            ))),
        }
    }

    /// `queued -> canceled`. Running and terminal jobs answer `Conflict`.
    pub async fn cancel(state: AppState, job_id: Uuid) -> Result<JobStatusResponse, JobError> {
        let job = state
            .ledger
            .transition(job_id, JobState::Queued, JobState::Canceled, TransitionPayload::Cancel)
            .await?;

        info!(%job_id, "🛑 Job canceled");
        Ok(job.into())
    }

    pub async fn stats(state: AppState) -> Result<JobStatsResponse, JobError> {
        let mut stats = JobStatsResponse {
            pending_deliveries: state.queue.len(),
            ..Default::default()
        };

        for job_state in JobState::ALL {
            *stats.count_mut(job_state) = state.ledger.list_in_state(job_state).await?.len();
        }

        Ok(stats)
    }

    /// Re-enqueue every `queued` job; run once at startup.
    pub async fn recover(state: AppState) -> Result<usize, JobError> {
        let queued = state.ledger.list_in_state(JobState::Queued).await?;
        for job in &queued {
            state.queue.enqueue(job.job_id);
        }

        info!("🔁 Recovered {} queued jobs", queued.len());
        Ok(queued.len())
    }
}
