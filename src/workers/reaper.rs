use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::infrastructure::ledger::LedgerError;
use crate::modules::jobs::model::{ErrorKind, JobFailure, JobState, TransitionPayload};
use crate::state::AppState;
use crate::workers::transcoder::retry_delay;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub requeued: usize,
    pub failed: usize,
    pub redelivered: usize,
}

/// Reclaim every running job whose lease expired before `now`, then
/// redeliver queued jobs nobody has picked up.
///
/// Jobs with budget left go back to `queued` and onto the channel; the rest
/// fail with `LeaseExpired`. A job that changed under us is left alone.
pub async fn reap_once(state: &AppState, now: OffsetDateTime) -> Result<ReapReport, LedgerError> {
    let mut report = ReapReport::default();
    let idle = state.queue.is_empty();

    for job in state.ledger.list_in_state(JobState::Running).await? {
        let Some(lease) = job.lease.filter(|l| l.is_expired(now)) else {
            continue;
        };
        let job_id = job.job_id;

        let (to, payload) = if job.can_retry() {
            (JobState::Queued, TransitionPayload::Requeue { lease_id: lease.lease_id })
        } else {
            (
                JobState::Failed,
                TransitionPayload::Fail {
                    lease_id: lease.lease_id,
                    error: JobFailure::new(
                        ErrorKind::LeaseExpired,
                        format!("lease expired after {} attempts", job.attempt_count + 1),
                    ),
                },
            )
        };

        match state.ledger.transition(job_id, JobState::Running, to, payload).await {
            Ok(_) if to == JobState::Queued => {
                warn!(%job_id, "♻️ Reclaimed expired lease, job requeued");
                state.queue.enqueue(job_id);
                report.requeued += 1;
            }
            Ok(_) => {
                error!(%job_id, "❌ Lease expired with no attempts left, job failed");
                report.failed += 1;
            }
            Err(LedgerError::Conflict { .. } | LedgerError::LeaseLost(_) | LedgerError::NotFound(_)) => {
                debug!(%job_id, "Job changed while reaping, skipped");
            }
            Err(e) => warn!(%job_id, "Failed to reclaim job: {}", e),
        }
    }

    if idle {
        report.redelivered = redeliver_stale(state, now).await?;
    }

    Ok(report)
}

/// Put queued jobs that have waited longer than a reaper period (plus their
/// retry backoff) back on the local channel.
///
/// Covers jobs whose delivery lived only in the memory of a process that
/// went away. Runs only while the local channel is empty, so a busy pool
/// does not pile up copies; extra copies lose the claim and are skipped.
async fn redeliver_stale(state: &AppState, now: OffsetDateTime) -> Result<usize, LedgerError> {
    let mut redelivered = 0;

    for job in state.ledger.list_in_state(JobState::Queued).await? {
        let mut grace = state.config.reaper_interval;
        if job.attempt_count > 0 {
            grace += retry_delay(state.config.retry_backoff, job.attempt_count);
        }
        if job.updated_at + grace > now {
            continue;
        }

        debug!(job_id = %job.job_id, "Redelivering stale queued job");
        state.queue.enqueue(job.job_id);
        redelivered += 1;
    }

    if redelivered > 0 {
        warn!(redelivered, "♻️ Redelivered queued jobs with no pending delivery");
    }
    Ok(redelivered)
}

/// Run `reap_once` every `reaper_interval` until shutdown.
pub fn spawn_reaper(state: AppState, shutdown: CancellationToken) -> JoinHandle<()> {
    let period = state.config.reaper_interval;
    info!("🧹 Starting lease reaper, every {:?}", period);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match reap_once(&state, OffsetDateTime::now_utc()).await {
                Ok(report) if report != ReapReport::default() => {
                    info!(
                        requeued = report.requeued,
                        failed = report.failed,
                        redelivered = report.redelivered,
                        "Reaper pass finished"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("❌ Reaper pass failed: {}", e),
            }
        }
        debug!("Lease reaper stopped");
    })
}
