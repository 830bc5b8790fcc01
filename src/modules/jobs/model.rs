use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use super::format::MediaFormat;
use crate::infrastructure::ledger::LedgerError;
use crate::infrastructure::storage::BlobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
    Canceled,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Queued,
        JobState::Running,
        JobState::Done,
        JobState::Failed,
        JobState::Canceled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Canceled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown job state '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ErrorKind {
    TransientToolFailure,
    PermanentToolFailure,
    LeaseExpired,
    StorageFailure,
}

/// Failure detail recorded on a job in the `failed` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Claim held by the worker currently running a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl Lease {
    pub fn new(expires_at: OffsetDateTime) -> Self {
        Self {
            lease_id: Uuid::new_v4(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

/// Data carried by a state transition. Each variant belongs to exactly one edge.
#[derive(Debug, Clone)]
pub enum TransitionPayload {
    /// queued -> running
    Claim { lease: Lease },
    /// running -> done
    Complete { lease_id: Uuid, output_ref: BlobId },
    /// running -> failed
    Fail { lease_id: Uuid, error: JobFailure },
    /// running -> queued, after a transient failure or an expired lease
    Requeue { lease_id: Uuid },
    /// queued -> canceled
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub input_ref: BlobId,
    pub input_format: MediaFormat,
    pub output_ref: Option<BlobId>,
    pub state: JobState,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub error: Option<JobFailure>,
    pub lease: Option<Lease>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Job {
    pub fn new(
        input_ref: BlobId,
        input_format: MediaFormat,
        max_attempts: u32,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            input_ref,
            input_format,
            output_ref: None,
            state: JobState::Queued,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            error: None,
            lease: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a failed attempt may go back to `queued` instead of `failed`.
    ///
    /// Leaving `running` consumes an attempt, so the attempt in flight is the
    /// last one when `attempt_count + 1` reaches the budget.
    pub fn can_retry(&self) -> bool {
        self.attempt_count + 1 < self.max_attempts
    }

    pub fn lease_expired(&self, now: OffsetDateTime) -> bool {
        self.state == JobState::Running && self.lease.is_some_and(|l| l.is_expired(now))
    }

    /// Compare-and-swap state change.
    ///
    /// Fails with `Conflict` when the current state is not `from`, and with
    /// `LeaseLost` when a running-exit edge names a lease the job no longer
    /// holds. On error the job is left untouched.
    pub fn apply(
        &mut self,
        from: JobState,
        to: JobState,
        payload: TransitionPayload,
        now: OffsetDateTime,
    ) -> Result<(), LedgerError> {
        if self.state != from {
            return Err(LedgerError::Conflict {
                job_id: self.job_id,
                expected: from,
                actual: self.state,
            });
        }

        match (from, to, payload) {
            (JobState::Queued, JobState::Running, TransitionPayload::Claim { lease }) => {
                self.lease = Some(lease);
            }
            (JobState::Running, JobState::Done, TransitionPayload::Complete { lease_id, output_ref }) => {
                self.check_lease(lease_id)?;
                self.attempt_count += 1;
                self.output_ref = Some(output_ref);
                self.lease = None;
            }
            (JobState::Running, JobState::Failed, TransitionPayload::Fail { lease_id, error }) => {
                self.check_lease(lease_id)?;
                self.attempt_count += 1;
                self.error = Some(error);
                self.lease = None;
            }
            (JobState::Running, JobState::Queued, TransitionPayload::Requeue { lease_id }) => {
                self.check_lease(lease_id)?;
                if !self.can_retry() {
                    return Err(LedgerError::InvalidTransition { from, to });
                }
                self.attempt_count += 1;
                self.lease = None;
            }
            (JobState::Queued, JobState::Canceled, TransitionPayload::Cancel) => {}
            _ => return Err(LedgerError::InvalidTransition { from, to }),
        }

        self.state = to;
        self.touch(now);
        Ok(())
    }

    /// Extend the lease of a running job. Does not count as a transition.
    pub fn extend_lease(
        &mut self,
        lease_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> Result<(), LedgerError> {
        if self.state != JobState::Running {
            return Err(LedgerError::Conflict {
                job_id: self.job_id,
                expected: JobState::Running,
                actual: self.state,
            });
        }
        self.check_lease(lease_id)?;
        if let Some(lease) = self.lease.as_mut() {
            lease.expires_at = lease.expires_at.max(expires_at);
        }
        Ok(())
    }

    fn check_lease(&self, lease_id: Uuid) -> Result<(), LedgerError> {
        match self.lease {
            Some(lease) if lease.lease_id == lease_id => Ok(()),
            _ => Err(LedgerError::LeaseLost(self.job_id)),
        }
    }

    fn touch(&mut self, now: OffsetDateTime) {
        self.updated_at = self.updated_at.max(now);
    }
}
