use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ffmpeg::ToolFailure;
use crate::infrastructure::ledger::{JobLedger, LedgerError};
use crate::infrastructure::storage::{BlobError, BlobId};
use crate::modules::jobs::model::{
    ErrorKind, Job, JobFailure, JobState, Lease, TransitionPayload,
};
use crate::state::AppState;

/// What a worker did with one delivered job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Another worker holds the job, or it is no longer queued.
    Skipped,
    Done,
    /// Transient failure, job went back to `queued`.
    Retried,
    Failed,
    /// Attempt dropped without a transition; the reaper reclaims the lease.
    Abandoned,
}

#[derive(Debug, thiserror::Error)]
enum ExecError {
    #[error(transparent)]
    Tool(#[from] ToolFailure),

    #[error("input blob {0} is missing")]
    MissingInput(BlobId),

    #[error(transparent)]
    Storage(BlobError),
}

/// Start `worker_count` workers on the shared job channel.
pub fn spawn_workers(state: AppState, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    info!("🎥 Starting {} transcoder workers...", state.config.worker_count);

    (0..state.config.worker_count)
        .map(|worker_id| tokio::spawn(run_worker(state.clone(), worker_id, shutdown.clone())))
        .collect()
}

async fn run_worker(state: AppState, worker_id: usize, shutdown: CancellationToken) {
    let rx = state.queue.receiver();
    debug!(worker_id, "Transcoder worker listening");

    loop {
        let job_id = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = rx.recv() => match received {
                Ok(job_id) => job_id,
                Err(_) => break,
            },
        };

        info!(worker_id, %job_id, "📦 Received transcoding job");
        let outcome = process_job(&state, worker_id, job_id, &shutdown).await;
        debug!(worker_id, %job_id, ?outcome, "Job handled");
    }

    info!(worker_id, "Transcoder worker stopped");
}

/// Claim, execute and finalize one job.
pub async fn process_job(
    state: &AppState,
    worker_id: usize,
    job_id: Uuid,
    shutdown: &CancellationToken,
) -> Outcome {
    let lease = Lease::new(OffsetDateTime::now_utc() + state.config.lease_ttl);

    let job = match state
        .ledger
        .transition(job_id, JobState::Queued, JobState::Running, TransitionPayload::Claim { lease })
        .await
    {
        Ok(job) => job,
        Err(LedgerError::Conflict { .. } | LedgerError::NotFound(_)) => {
            debug!(worker_id, %job_id, "Job not claimable, skipping");
            return Outcome::Skipped;
        }
        Err(e) => {
            error!(worker_id, %job_id, "❌ Failed to claim job: {}", e);
            state.queue.enqueue_after(job_id, state.config.retry_backoff);
            return Outcome::Skipped;
        }
    };

    info!(worker_id, %job_id, attempt = job.attempt_count + 1, "Processing job");

    let heartbeat = Heartbeat::start(state.ledger.clone(), job_id, lease.lease_id, state.config.lease_ttl);

    let result = tokio::select! {
        result = execute(state, &job) => result,
        _ = shutdown.cancelled() => {
            warn!(worker_id, %job_id, "Shutdown during execution, leaving job to the reaper");
            return Outcome::Abandoned;
        }
    };

    drop(heartbeat);
    finalize(state, worker_id, &job, lease.lease_id, result).await
}

async fn execute(state: &AppState, job: &Job) -> Result<BlobId, ExecError> {
    let input = state.blobs.get(&job.input_ref).await.map_err(|e| match e {
        BlobError::NotFound(id) => ExecError::MissingInput(id),
        other => ExecError::Storage(other),
    })?;

    debug!(job_id = %job.job_id, bytes = input.len(), "⬇️ Input loaded");

    let output = state
        .transcoder
        .transcode(input, job.input_format, state.config.job_timeout)
        .await?;

    let blob = state.blobs.put(output).await.map_err(ExecError::Storage)?;
    debug!(job_id = %job.job_id, output = %blob.blob_id, size = blob.size, "⬆️ Output stored");

    Ok(blob.blob_id)
}

async fn finalize(
    state: &AppState,
    worker_id: usize,
    job: &Job,
    lease_id: Uuid,
    result: Result<BlobId, ExecError>,
) -> Outcome {
    let job_id = job.job_id;

    let (to, payload, outcome) = match result {
        Ok(output_ref) => (
            JobState::Done,
            TransitionPayload::Complete { lease_id, output_ref },
            Outcome::Done,
        ),
        Err(ExecError::Storage(e)) => {
            error!(worker_id, %job_id, "❌ Storage failure, abandoning attempt: {}", e);
            return Outcome::Abandoned;
        }
        Err(ExecError::MissingInput(id)) => (
            JobState::Failed,
            TransitionPayload::Fail {
                lease_id,
                error: JobFailure::new(ErrorKind::StorageFailure, format!("input blob {} is missing", id)),
            },
            Outcome::Failed,
        ),
        Err(ExecError::Tool(failure)) if failure.is_permanent() || !job.can_retry() => {
            warn!(worker_id, %job_id, "Tool failure, not retrying: {}", failure);
            (
                JobState::Failed,
                TransitionPayload::Fail {
                    lease_id,
                    error: JobFailure::new(failure.kind(), failure.to_string()),
                },
                Outcome::Failed,
            )
        }
        Err(ExecError::Tool(failure)) => {
            warn!(worker_id, %job_id, "Transient tool failure, requeueing: {}", failure);
            (JobState::Queued, TransitionPayload::Requeue { lease_id }, Outcome::Retried)
        }
    };

    match state.ledger.transition(job_id, JobState::Running, to, payload).await {
        Ok(updated) => {
            match outcome {
                Outcome::Done => info!(worker_id, %job_id, "✅ Job completed"),
                Outcome::Retried => {
                    let delay = retry_delay(state.config.retry_backoff, updated.attempt_count);
                    state.queue.enqueue_after(job_id, delay);
                }
                _ => error!(worker_id, %job_id, attempts = updated.attempt_count, "❌ Job failed"),
            }
            outcome
        }
        Err(LedgerError::LeaseLost(_) | LedgerError::Conflict { .. }) => {
            warn!(worker_id, %job_id, "Lease lost before finalizing, result discarded");
            Outcome::Skipped
        }
        Err(e) => {
            error!(worker_id, %job_id, "❌ Failed to finalize job: {}", e);
            Outcome::Abandoned
        }
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)`.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

/// Keeps a lease alive while the job executes. Stops when dropped.
struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    fn start(ledger: Arc<dyn JobLedger>, job_id: Uuid, lease_id: Uuid, ttl: Duration) -> Self {
        let period = (ttl / 3).max(Duration::from_millis(10));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let expires_at = OffsetDateTime::now_utc() + ttl;
                match ledger.heartbeat(job_id, lease_id, expires_at).await {
                    Ok(_) => debug!(%job_id, "Lease extended"),
                    Err(e @ (LedgerError::LeaseLost(_) | LedgerError::Conflict { .. } | LedgerError::NotFound(_))) => {
                        warn!(%job_id, "Heartbeat stopped: {}", e);
                        break;
                    }
                    Err(e) => warn!(%job_id, "Heartbeat failed: {}", e),
                }
            }
        });

        Self { handle }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::config::settings::AppConfig;
    use crate::modules::jobs::format::MediaFormat;
    use crate::state::tests::{local_state, local_state_with};
    use crate::workers::ffmpeg::Transcoder;

    #[derive(Clone, Copy)]
    pub(crate) enum Behavior {
        Reverse,
        Transient,
        Permanent,
        Hang,
    }

    pub(crate) struct FakeTool {
        behavior: Behavior,
        pub(crate) calls: AtomicUsize,
    }

    impl FakeTool {
        pub(crate) fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transcoder for FakeTool {
        async fn transcode(
            &self,
            input: Bytes,
            _format: MediaFormat,
            _timeout: Duration,
        ) -> Result<Bytes, ToolFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Reverse => Ok(input.iter().rev().copied().collect::<Vec<u8>>().into()),
                Behavior::Transient => Err(ToolFailure::NonZeroExit {
                    code: Some(1),
                    stderr: "Conversion failed!".to_string(),
                }),
                Behavior::Permanent => Err(ToolFailure::Rejected(
                    "Invalid data found when processing input".to_string(),
                )),
                Behavior::Hang => std::future::pending().await,
            }
        }
    }

    async fn queued_job(state: &AppState, data: &'static [u8]) -> Job {
        let blob = state.blobs.put(Bytes::from_static(data)).await.unwrap();
        state
            .ledger
            .create(&blob.blob_id, MediaFormat::Mp4, state.config.max_attempts)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn successful_job_is_done_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let state = local_state(dir.path(), FakeTool::new(Behavior::Reverse)).await;
        let job = queued_job(&state, b"abc").await;

        let outcome = process_job(&state, 0, job.job_id, &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Done);

        let job = state.ledger.get(job.job_id).await.unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.attempt_count, 1);
        assert!(job.lease.is_none());

        let output = state.blobs.get(job.output_ref.as_ref().unwrap()).await.unwrap();
        assert_eq!(output, Bytes::from_static(b"cba"));
    }

    #[tokio::test]
    async fn transient_failures_exhaust_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FakeTool::new(Behavior::Transient);
        let state = local_state(dir.path(), tool.clone()).await;
        let job = queued_job(&state, b"abc").await;
        let max_attempts = state.config.max_attempts;

        let mut outcomes = Vec::new();
        loop {
            let outcome = process_job(&state, 0, job.job_id, &CancellationToken::new()).await;
            outcomes.push(outcome);
            if outcome != Outcome::Retried {
                break;
            }
        }

        assert_eq!(outcomes.len() as u32, max_attempts);
        assert_eq!(outcomes.last(), Some(&Outcome::Failed));
        assert_eq!(tool.calls.load(Ordering::SeqCst) as u32, max_attempts);

        let job = state.ledger.get(job.job_id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt_count, max_attempts);
        assert_eq!(job.error.unwrap().kind, ErrorKind::TransientToolFailure);
    }

    #[tokio::test]
    async fn retried_job_is_redelivered() {
        let dir = tempfile::tempdir().unwrap();
        let state = local_state(dir.path(), FakeTool::new(Behavior::Transient)).await;
        let rx = state.queue.receiver();
        let job = queued_job(&state, b"abc").await;

        let outcome = process_job(&state, 0, job.job_id, &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Retried);

        let redelivered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered, job.job_id);
        assert_eq!(state.ledger.get(job.job_id).await.unwrap().state, JobState::Queued);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FakeTool::new(Behavior::Permanent);
        let state = local_state(dir.path(), tool.clone()).await;
        let job = queued_job(&state, b"abc").await;

        let outcome = process_job(&state, 0, job.job_id, &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);

        let job = state.ledger.get(job.job_id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt_count, 1);
        assert_eq!(job.error.unwrap().kind, ErrorKind::PermanentToolFailure);
        assert!(job.output_ref.is_none());
    }

    #[tokio::test]
    async fn claimed_job_is_skipped_by_other_workers() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FakeTool::new(Behavior::Reverse);
        let state = local_state(dir.path(), tool.clone()).await;
        let job = queued_job(&state, b"abc").await;

        let lease = Lease::new(OffsetDateTime::now_utc() + Duration::from_secs(60));
        state
            .ledger
            .transition(job.job_id, JobState::Queued, JobState::Running, TransitionPayload::Claim { lease })
            .await
            .unwrap();

        let outcome = process_job(&state, 1, job.job_id, &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Skipped);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);

        let outcome = process_job(&state, 1, Uuid::new_v4(), &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Skipped);
    }

    #[tokio::test]
    async fn missing_input_fails_with_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let state = local_state(dir.path(), FakeTool::new(Behavior::Reverse)).await;
        let job = state
            .ledger
            .create(&BlobId::for_bytes(b"never stored"), MediaFormat::Png, 3)
            .await
            .unwrap();

        let outcome = process_job(&state, 0, job.job_id, &CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Failed);

        let job = state.ledger.get(job.job_id).await.unwrap();
        assert_eq!(job.error.unwrap().kind, ErrorKind::StorageFailure);
    }

    #[tokio::test]
    async fn shutdown_abandons_running_job() {
        let dir = tempfile::tempdir().unwrap();
        let state = local_state(dir.path(), FakeTool::new(Behavior::Hang)).await;
        let job = queued_job(&state, b"abc").await;

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = process_job(&state, 0, job.job_id, &shutdown).await;
        assert_eq!(outcome, Outcome::Abandoned);

        let job = state.ledger.get(job.job_id).await.unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.attempt_count, 0);
    }

    #[tokio::test]
    async fn heartbeat_keeps_lease_alive() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::for_tests(dir.path());
        config.lease_ttl = Duration::from_millis(300);
        let state = local_state_with(config, FakeTool::new(Behavior::Hang)).await;
        let job = queued_job(&state, b"abc").await;

        let shutdown = CancellationToken::new();
        let worker = {
            let state = state.clone();
            let shutdown = shutdown.clone();
            let job_id = job.job_id;
            tokio::spawn(async move { process_job(&state, 0, job_id, &shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let first = state.ledger.get(job.job_id).await.unwrap().lease.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        let later = state.ledger.get(job.job_id).await.unwrap();

        assert_eq!(later.lease.unwrap().lease_id, first.lease_id);
        assert!(later.lease.unwrap().expires_at > first.expires_at);
        assert!(!later.lease_expired(OffsetDateTime::now_utc()));

        shutdown.cancel();
        assert_eq!(worker.await.unwrap(), Outcome::Abandoned);
    }

    #[tokio::test]
    async fn pool_drains_the_channel() {
        let dir = tempfile::tempdir().unwrap();
        let state = local_state(dir.path(), FakeTool::new(Behavior::Reverse)).await;
        let shutdown = CancellationToken::new();
        let workers = spawn_workers(state.clone(), shutdown.clone());

        let mut ids = Vec::new();
        for data in [&b"one"[..], b"two", b"three", b"four"] {
            let blob = state.blobs.put(Bytes::from_static(data)).await.unwrap();
            let job = state.ledger.create(&blob.blob_id, MediaFormat::Wav, 3).await.unwrap();
            state.queue.enqueue(job.job_id);
            // duplicate deliveries are harmless
            state.queue.enqueue(job.job_id);
            ids.push(job.job_id);
        }

        for job_id in ids {
            let mut state_now = JobState::Queued;
            for _ in 0..200 {
                state_now = state.ledger.get(job_id).await.unwrap().state;
                if state_now.is_terminal() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(state_now, JobState::Done);
            assert_eq!(state.ledger.get(job_id).await.unwrap().attempt_count, 1);
        }

        shutdown.cancel();
        for worker in workers {
            worker.await.unwrap();
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(retry_delay(base, 1), Duration::from_millis(100));
        assert_eq!(retry_delay(base, 2), Duration::from_millis(200));
        assert_eq!(retry_delay(base, 4), Duration::from_millis(800));
        assert_eq!(retry_delay(base, 0), base);
    }
}
