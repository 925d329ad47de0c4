use std::sync::Arc;

use common::object_store::ObjectStore;
use common::types::ExtractionJob;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::tracker::ExtractionJobs;
use crate::fetcher::ChainDataProvider;
use crate::pipeline::Pipeline;

#[derive(Debug)]
struct QueuedJob {
    id: i64,
    address: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("extraction queue is full")]
    QueueFull,
    #[error("extraction queue is shut down")]
    Closed,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub job: ExtractionJob,
    /// `false` when an in-flight job for the address was returned instead.
    pub created: bool,
}

/// Bounded extraction queue drained by a fixed pool of workers.
///
/// The job tracker is the dedup key: a trigger for an address that already
/// has a pending or processing job returns that job and enqueues nothing.
#[derive(Clone)]
pub struct ExtractionQueue {
    jobs: ExtractionJobs,
    tx: mpsc::Sender<QueuedJob>,
}

impl ExtractionQueue {
    pub fn start<P, O>(
        pipeline: Arc<Pipeline<P, O>>,
        jobs: ExtractionJobs,
        workers: usize,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>)
    where
        P: ChainDataProvider + 'static,
        O: ObjectStore + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let pipeline = Arc::clone(&pipeline);
                let jobs = jobs.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let next = tokio::select! {
                            () = cancel.cancelled() => break,
                            job = async { rx.lock().await.recv().await } => job,
                        };
                        let Some(job) = next else { break };
                        process(&pipeline, &jobs, worker, job).await;
                    }
                    info!(worker, "extraction worker stopped");
                })
            })
            .collect();

        (Self { jobs, tx }, handles)
    }

    pub fn jobs(&self) -> &ExtractionJobs {
        &self.jobs
    }

    /// Record a job for `address` and hand it to the workers. Returns at once.
    pub async fn trigger(&self, address: &str) -> Result<TriggerOutcome, TriggerError> {
        let (job, created) = self.jobs.create_or_get_inflight(address).await?;
        if !created {
            info!(job_id = job.id, address = %job.address, "extraction already in flight");
            return Ok(TriggerOutcome { job, created });
        }

        let queued = QueuedJob {
            id: job.id,
            address: job.address.clone(),
        };
        let err = match self.tx.try_send(queued) {
            Ok(()) => {
                info!(job_id = job.id, address = %job.address, "extraction queued");
                return Ok(TriggerOutcome { job, created });
            }
            Err(mpsc::error::TrySendError::Full(_)) => TriggerError::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => TriggerError::Closed,
        };

        // The job was never handed to a worker; close it so the address can be retried.
        warn!(job_id = job.id, address = %job.address, error = %err, "extraction not queued");
        self.jobs.mark_failed(job.id, &err.to_string()).await?;
        Err(err)
    }
}

async fn process<P, O>(
    pipeline: &Pipeline<P, O>,
    jobs: &ExtractionJobs,
    worker: usize,
    job: QueuedJob,
) where
    P: ChainDataProvider,
    O: ObjectStore,
{
    match jobs.mark_processing(job.id).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            error!(job_id = job.id, error = %e, "failed to mark job processing");
            // Left pending, the job would block new triggers for the address.
            if let Err(e) = jobs.mark_failed(job.id, &format!("{e:#}")).await {
                error!(job_id = job.id, error = %e, "failed to record job outcome");
            }
            return;
        }
    }

    let outcome = match pipeline.run_address(&job.address).await {
        Ok(record) => {
            info!(
                worker,
                job_id = job.id,
                address = %job.address,
                total_score = record.total_score,
                "extraction completed"
            );
            jobs.mark_completed(job.id).await
        }
        Err(e) => {
            error!(
                worker,
                job_id = job.id,
                address = %job.address,
                kind = e.kind(),
                error = %e,
                "extraction failed"
            );
            jobs.mark_failed(job.id, &e.to_string()).await
        }
    };
    if let Err(e) = outcome {
        error!(job_id = job.id, error = %e, "failed to record job outcome");
    }
}
