use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;
use uuid::Uuid;

use crate::common::response::{ApiError, ApiErrorWith};
use crate::infrastructure::ledger::LedgerError;
use crate::infrastructure::storage::BlobError;
use crate::modules::jobs::model::{JobFailure, JobState};

/// Request-scoped errors of the job API.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error("job is {0}, result not ready")]
    NotReady(JobState),

    #[error("job failed: {}", .0.message)]
    Failed(JobFailure),

    #[error("job {0} was canceled")]
    Canceled(Uuid),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl JobError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            JobError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::Conflict(_) | JobError::NotReady(_) => StatusCode::CONFLICT,
            JobError::Failed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            JobError::Canceled(_) => StatusCode::GONE,
            JobError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LedgerError> for JobError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(id) => JobError::NotFound(id),
            LedgerError::Conflict { .. }
            | LedgerError::LeaseLost(_)
            | LedgerError::InvalidTransition { .. } => JobError::Conflict(e.to_string()),
            LedgerError::Unavailable(msg) => JobError::Storage(msg),
        }
    }
}

impl From<BlobError> for JobError {
    fn from(e: BlobError) -> Self {
        JobError::Storage(e.to_string())
    }
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("❌ {}", self);
        }

        match self {
            JobError::Failed(failure) => {
                let message = format!("job failed: {}", failure.message);
                ApiErrorWith(failure, message, status).into_response()
            }
            other => ApiError(other.to_string(), status).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::jobs::model::ErrorKind;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        let id = Uuid::new_v4();
        assert_eq!(JobError::InvalidInput("empty".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(JobError::NotFound(id).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(JobError::NotReady(JobState::Running).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            JobError::Failed(JobFailure::new(ErrorKind::PermanentToolFailure, "bad")).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(JobError::Canceled(id).status_code(), StatusCode::GONE);
        assert_eq!(JobError::Storage("disk".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn ledger_errors_map_to_api_errors() {
        let id = Uuid::new_v4();
        assert!(matches!(JobError::from(LedgerError::NotFound(id)), JobError::NotFound(x) if x == id));
        assert!(matches!(
            JobError::from(LedgerError::Conflict {
                job_id: id,
                expected: JobState::Queued,
                actual: JobState::Done,
            }),
            JobError::Conflict(_)
        ));
        assert!(matches!(
            JobError::from(LedgerError::Unavailable("io".into())),
            JobError::Storage(_)
        ));
    }
}
