use std::time::Duration;

use async_channel::{Receiver, Sender};
use tracing::{debug, warn};
use uuid::Uuid;

/// Work-distribution channel between the dispatcher and the worker pool.
///
/// Carries job ids only; the ledger stays the source of truth for state. An
/// id may be delivered more than once (recovery, reaper, retries) and the
/// losing claim simply gets a `Conflict`. Unbounded so intake never waits on
/// busy workers.
#[derive(Clone)]
pub struct JobQueue {
    tx: Sender<Uuid>,
    rx: Receiver<Uuid>,
}

impl JobQueue {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }

    /// Hand a job to the next idle worker. Returns `false` if the channel is closed.
    pub fn enqueue(&self, job_id: Uuid) -> bool {
        match self.tx.try_send(job_id) {
            Ok(()) => {
                debug!(%job_id, "Job enqueued");
                true
            }
            Err(e) => {
                warn!(%job_id, "Failed to enqueue job: {}", e);
                false
            }
        }
    }

    /// Enqueue after `delay` without blocking the caller.
    pub fn enqueue_after(&self, job_id: Uuid, delay: Duration) {
        if delay.is_zero() {
            self.enqueue(job_id);
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(job_id);
        });
    }

    pub fn receiver(&self) -> Receiver<Uuid> {
        self.rx.clone()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Stop accepting work; idle workers see the channel close.
    pub fn close(&self) {
        self.tx.close();
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
