use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{JobLedger, LedgerError};
use crate::infrastructure::storage::BlobId;
use crate::modules::jobs::format::MediaFormat;
use crate::modules::jobs::model::{Job, JobFailure, JobState, Lease, TransitionPayload};

const JOB_COLUMNS: &str = r#"
    id, input_ref, input_format, output_ref, state, attempt_count, max_attempts,
    error, lease_id, lease_expires_at, created_at, updated_at
"#;

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    input_ref: String,
    input_format: String,
    output_ref: Option<String>,
    state: String,
    attempt_count: i32,
    max_attempts: i32,
    error: Option<Json<JobFailure>>,
    lease_id: Option<Uuid>,
    lease_expires_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<JobRow> for Job {
    type Error = LedgerError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |what: String| LedgerError::Unavailable(format!("corrupt job row {}: {}", id, what));

        let lease = match (row.lease_id, row.lease_expires_at) {
            (Some(lease_id), Some(expires_at)) => Some(Lease { lease_id, expires_at }),
            _ => None,
        };

        Ok(Job {
            job_id: id,
            input_ref: row.input_ref.parse::<BlobId>().map_err(|e| corrupt(e.to_string()))?,
            input_format: row.input_format.parse::<MediaFormat>().map_err(corrupt)?,
            output_ref: row
                .output_ref
                .as_deref()
                .map(str::parse::<BlobId>)
                .transpose()
                .map_err(|e| corrupt(e.to_string()))?,
            state: row.state.parse::<JobState>().map_err(corrupt)?,
            attempt_count: u32::try_from(row.attempt_count).map_err(|e| corrupt(e.to_string()))?,
            max_attempts: u32::try_from(row.max_attempts).map_err(|e| corrupt(e.to_string()))?,
            error: row.error.map(|Json(e)| e),
            lease,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Job ledger stored in the `jobs` table.
///
/// A transition locks the row (`FOR UPDATE`), applies the state machine in
/// Rust and writes the whole row back in the same transaction, so the CAS
/// holds across any number of service processes sharing the database.
#[derive(Clone)]
pub struct PgJobLedger {
    pool: PgPool,
}

impl PgJobLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
    ) -> Result<Job, LedgerError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = $1 FOR UPDATE",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(LedgerError::NotFound(job_id))?;

        Job::try_from(row)
    }

    async fn write_row(tx: &mut Transaction<'_, Postgres>, job: &Job) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET
                output_ref = $2,
                state = $3,
                attempt_count = $4,
                error = $5,
                lease_id = $6,
                lease_expires_at = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(job.job_id)
        .bind(job.output_ref.as_ref().map(|r| r.to_string()))
        .bind(job.state.as_str())
        .bind(job.attempt_count as i32)
        .bind(job.error.clone().map(Json))
        .bind(job.lease.map(|l| l.lease_id))
        .bind(job.lease.map(|l| l.expires_at))
        .bind(job.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl JobLedger for PgJobLedger {
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

        sqlx::query(
            r#"
            INSERT INTO jobs (id, input_ref, input_format, state, attempt_count, max_attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.job_id)
        .bind(job.input_ref.as_str())
        .bind(job.input_format.as_str())
        .bind(job.state.as_str())
        .bind(job.attempt_count as i32)
        .bind(job.max_attempts as i32)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Job, LedgerError> {
        let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NotFound(job_id))?;

        Job::try_from(row)
    }

    async fn transition(
        &self,
        job_id: Uuid,
        from: JobState,
        to: JobState,
        payload: TransitionPayload,
    ) -> Result<Job, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let mut job = Self::lock_row(&mut tx, job_id).await?;
        job.apply(from, to, payload, OffsetDateTime::now_utc())?;
        Self::write_row(&mut tx, &job).await?;

        tx.commit().await?;
        Ok(job)
    }

    async fn heartbeat(
        &self,
        job_id: Uuid,
        lease_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> Result<Job, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let mut job = Self::lock_row(&mut tx, job_id).await?;
        job.extend_lease(lease_id, expires_at)?;
        Self::write_row(&mut tx, &job).await?;

        tx.commit().await?;
        Ok(job)
    }

    async fn list_in_state(&self, state: JobState) -> Result<Vec<Job>, LedgerError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE state = $1 ORDER BY created_at ASC",
            JOB_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::jobs::model::ErrorKind;

    fn running_row() -> JobRow {
        let now = OffsetDateTime::now_utc();
        JobRow {
            id: Uuid::new_v4(),
            input_ref: BlobId::for_bytes(b"in").to_string(),
            input_format: MediaFormat::QuickTime.as_str().to_string(),
            output_ref: None,
            state: JobState::Running.as_str().to_string(),
            attempt_count: 1,
            max_attempts: 3,
            error: Some(Json(JobFailure::new(ErrorKind::TransientToolFailure, "exit 1"))),
            lease_id: Some(Uuid::new_v4()),
            lease_expires_at: Some(now + time::Duration::seconds(30)),
            created_at: now,
            updated_at: now,
        }
    }

    fn assert_corrupt(row: JobRow) {
        let id = row.id;
        match Job::try_from(row) {
            Err(LedgerError::Unavailable(msg)) => assert!(msg.contains(&id.to_string()), "{msg}"),
            other => panic!("expected a corrupt-row error, got {other:?}"),
        }
    }

    #[test]
    fn well_formed_row_maps_to_job() {
        let row = running_row();
        let (id, lease_id, expires_at) = (row.id, row.lease_id, row.lease_expires_at);

        let job = Job::try_from(row).unwrap();

        assert_eq!(job.job_id, id);
        assert_eq!(job.input_ref, BlobId::for_bytes(b"in"));
        assert_eq!(job.input_format, MediaFormat::QuickTime);
        assert_eq!(job.state, JobState::Running);
        assert_eq!((job.attempt_count, job.max_attempts), (1, 3));
        assert_eq!(job.error.unwrap().kind, ErrorKind::TransientToolFailure);
        let lease = job.lease.unwrap();
        assert_eq!(Some(lease.lease_id), lease_id);
        assert_eq!(Some(lease.expires_at), expires_at);
    }

    #[test]
    fn done_row_keeps_its_output() {
        let mut row = running_row();
        row.state = JobState::Done.as_str().to_string();
        row.output_ref = Some(BlobId::for_bytes(b"out").to_string());
        row.error = None;
        row.lease_id = None;
        row.lease_expires_at = None;

        let job = Job::try_from(row).unwrap();

        assert_eq!(job.output_ref, Some(BlobId::for_bytes(b"out")));
        assert!(job.lease.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn corrupt_rows_are_rejected() {
        let mut row = running_row();
        row.state = "paused".to_string();
        assert_corrupt(row);

        let mut row = running_row();
        row.attempt_count = -1;
        assert_corrupt(row);

        let mut row = running_row();
        row.input_format = "betamax".to_string();
        assert_corrupt(row);

        let mut row = running_row();
        row.input_ref = "not-a-hash".to_string();
        assert_corrupt(row);

        let mut row = running_row();
        row.output_ref = Some("zz".to_string());
        assert_corrupt(row);
    }
}
