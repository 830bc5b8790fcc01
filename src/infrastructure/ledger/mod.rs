use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::infrastructure::storage::BlobId;
use crate::modules::jobs::format::MediaFormat;
use crate::modules::jobs::model::{Job, JobState, TransitionPayload};

pub mod file;
pub mod postgres;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("job {job_id} is {actual}, expected {expected}")]
    Conflict {
        job_id: Uuid,
        expected: JobState,
        actual: JobState,
    },

    #[error("lease on job {0} is no longer held")]
    LeaseLost(Uuid),

    #[error("transition {from} -> {to} is not allowed")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("job ledger unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Unavailable(e.to_string())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Unavailable(e.to_string())
    }
}

/// Durable record of jobs and their state transitions.
///
/// `transition` is the only way to change a job's state and is a
/// compare-and-swap on `from`: of any number of concurrent callers naming the
/// same `from`, at most one succeeds and the rest get `Conflict`.
#[async_trait]
pub trait JobLedger: Send + Sync {
    async fn create(
        &self,
        input_ref: &BlobId,
        input_format: MediaFormat,
        max_attempts: u32,
    ) -> Result<Job, LedgerError>;

    async fn get(&self, job_id: Uuid) -> Result<Job, LedgerError>;

    async fn transition(
        &self,
        job_id: Uuid,
        from: JobState,
        to: JobState,
        payload: TransitionPayload,
    ) -> Result<Job, LedgerError>;

    async fn heartbeat(
        &self,
        job_id: Uuid,
        lease_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> Result<Job, LedgerError>;

    async fn list_in_state(&self, state: JobState) -> Result<Vec<Job>, LedgerError>;
}
