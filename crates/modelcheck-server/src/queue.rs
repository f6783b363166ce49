//! Sequential validation queue
//!
//! One background task takes jobs off a bounded FIFO channel and runs them to
//! completion one at a time, cleanup included, before taking the next. Each
//! job carries a cancellation token that fires when its submitter goes away.

use crate::orchestrator::ValidationOrchestrator;
use modelcheck_core::{ValidationRequest, ValidationResult};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why a job could not be run
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("validation queue is full")]
    Full,

    #[error("validation worker is not running")]
    Stopped,
}

/// A request waiting for the worker
struct ValidationJob {
    request: ValidationRequest,
    reply: oneshot::Sender<ValidationResult>,
    cancel: CancellationToken,
}

/// Handle used to submit requests to the validation worker
#[derive(Clone)]
pub struct ValidationQueue {
    sender: mpsc::Sender<ValidationJob>,
}

impl ValidationQueue {
    /// Start the worker task
    ///
    /// The worker stops taking jobs once `shutdown` fires; the job in flight
    /// at that moment runs to completion and jobs still queued are dropped.
    pub fn start(
        orchestrator: Arc<ValidationOrchestrator>,
        depth: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(depth);
        let handle = tokio::spawn(run_worker(orchestrator, receiver, shutdown));

        info!("Validation queue started with depth {}", depth);
        (Self { sender }, handle)
    }

    /// Queue `request` and wait for its result
    ///
    /// Dropping the returned future cancels the job, whether it is still
    /// queued or already running.
    pub async fn submit(&self, request: ValidationRequest) -> Result<ValidationResult, QueueError> {
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let (reply, response) = oneshot::channel();

        let job = ValidationJob {
            request,
            reply,
            cancel,
        };
        metrics::gauge!("modelcheck_queue_depth").increment(1.0);
        self.sender.try_send(job).map_err(|e| {
            metrics::gauge!("modelcheck_queue_depth").decrement(1.0);
            match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full,
                mpsc::error::TrySendError::Closed(_) => QueueError::Stopped,
            }
        })?;

        let result = response.await.map_err(|_| QueueError::Stopped)?;
        guard.disarm();
        Ok(result)
    }

    /// Whether the worker task is still accepting jobs
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Background worker task
async fn run_worker(
    orchestrator: Arc<ValidationOrchestrator>,
    mut receiver: mpsc::Receiver<ValidationJob>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        metrics::gauge!("modelcheck_queue_depth").decrement(1.0);

        if job.cancel.is_cancelled() {
            debug!("Skipping job whose caller went away");
            continue;
        }

        let result = orchestrator.validate(&job.request, &job.cancel).await;
        if job.reply.send(result).is_err() {
            debug!("Caller went away before the result was delivered");
        }
    }

    receiver.close();
    let mut dropped = 0;
    while let Ok(job) = receiver.try_recv() {
        metrics::gauge!("modelcheck_queue_depth").decrement(1.0);
        job.cancel.cancel();
        dropped += 1;
    }
    if dropped > 0 {
        info!("Dropped {} queued jobs at shutdown", dropped);
    }
    info!("Validation worker stopped");
}
