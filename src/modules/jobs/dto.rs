use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use super::format::MediaFormat;
use super::model::{Job, JobFailure, JobState};

/// Multipart form accepted by `POST /api/v1/jobs`.
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct SubmitJobForm {
    #[schema(value_type = String, format = Binary)]
    pub media: Vec<u8>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub state: JobState,
    pub input_format: MediaFormat,
    pub attempt_count: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            state: job.state,
            input_format: job.input_format,
            attempt_count: job.attempt_count,
            max_attempts: job.max_attempts,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct JobStatsResponse {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub canceled: usize,
    /// Ids waiting on the work channel, duplicates included.
    pub pending_deliveries: usize,
}

impl JobStatsResponse {
    pub fn count_mut(&mut self, state: JobState) -> &mut usize {
        match state {
            JobState::Queued => &mut self.queued,
            JobState::Running => &mut self.running,
            JobState::Done => &mut self.done,
            JobState::Failed => &mut self.failed,
            JobState::Canceled => &mut self.canceled,
        }
    }

    pub fn count(&self, state: JobState) -> usize {
        match state {
            JobState::Queued => self.queued,
            JobState::Running => self.running,
            JobState::Done => self.done,
            JobState::Failed => self.failed,
            JobState::Canceled => self.canceled,
        }
    }

    /// Prometheus text exposition of these counts.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(512);

        output.push_str("# HELP mediajobs_jobs Jobs in the ledger by state\n");
        output.push_str("# TYPE mediajobs_jobs gauge\n");
        for state in JobState::ALL {
            output.push_str(&format!(
                "mediajobs_jobs{{state=\"{}\"}} {}\n",
                state.as_str(),
                self.count(state)
            ));
        }
        output.push('\n');

        output.push_str("# HELP mediajobs_pending_deliveries Job ids waiting on the local work channel\n");
        output.push_str("# TYPE mediajobs_pending_deliveries gauge\n");
        output.push_str(&format!("mediajobs_pending_deliveries {}\n", self.pending_deliveries));

        output
    }
}

/// Output of a finished job.
#[derive(Debug)]
pub struct JobResult {
    pub content_type: &'static str,
    pub data: bytes::Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_output_lists_every_state() {
        let mut stats = JobStatsResponse {
            pending_deliveries: 4,
            ..Default::default()
        };
        *stats.count_mut(JobState::Queued) = 2;
        *stats.count_mut(JobState::Failed) = 1;

        let text = stats.to_prometheus();

        assert!(text.contains("# TYPE mediajobs_jobs gauge\n"));
        assert!(text.contains("mediajobs_jobs{state=\"queued\"} 2\n"));
        assert!(text.contains("mediajobs_jobs{state=\"running\"} 0\n"));
        assert!(text.contains("mediajobs_jobs{state=\"failed\"} 1\n"));
        assert!(text.contains("mediajobs_jobs{state=\"canceled\"} 0\n"));
        assert!(text.contains("mediajobs_pending_deliveries 4\n"));
    }
}
