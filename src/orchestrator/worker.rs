//! Worker pool over the work queue
//!
//! Each worker processes one execution at a time. A job is acknowledged
//! only after `run` returns; a worker crash leaves the job invisible until
//! the visibility timeout, after which another worker picks it up and
//! resumes from the first non-terminal case-result row.

use crate::orchestrator::{Orchestrator, WorkQueue};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

const IDLE_POLL: Duration = Duration::from_millis(500);

/// Outcome of a `drain` pass, reported by the queue-drain binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainStats {
    pub processed: u64,
    pub failed: u64,
}

/// Pool of worker tasks pulling `RunExecution` jobs
pub struct WorkerPool {
    queue: Arc<dyn WorkQueue>,
    orchestrator: Arc<Orchestrator>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn WorkQueue>, orchestrator: Arc<Orchestrator>, workers: usize) -> Self {
        Self {
            queue,
            orchestrator,
            workers: workers.max(1),
        }
    }

    /// Handle one delivery. Returns whether the job should be acknowledged:
    /// successful runs and caller-shaped failures (nothing to retry) ack;
    /// transient failures leave the job for redelivery.
    #[instrument(skip(orchestrator, delivery), fields(execution_id = %delivery.job.execution_id))]
    async fn process(
        orchestrator: &Orchestrator,
        delivery: &crate::orchestrator::Delivery,
    ) -> bool {
        match orchestrator.run(&delivery.job).await {
            Ok(()) => true,
            Err(err) if err.is_caller_error() => {
                warn!(error = %err, "dropping job that cannot make progress");
                true
            }
            Err(err) => {
                error!(
                    error = %err,
                    delivery_count = delivery.delivery_count,
                    "execution run failed, leaving job for redelivery"
                );
                false
            }
        }
    }

    /// Spawn the workers; they stop when `shutdown` flips to true
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|worker_index| {
                let queue = Arc::clone(&self.queue);
                let orchestrator = Arc::clone(&self.orchestrator);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    info!(worker_index, "worker started");
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        let delivery = match queue.dequeue().await {
                            Ok(Some(delivery)) => delivery,
                            Ok(None) => {
                                tokio::select! {
                                    () = queue.wait_for_work(IDLE_POLL) => {}
                                    _ = shutdown.changed() => {}
                                }
                                continue;
                            }
                            Err(err) => {
                                error!(error = %err, "queue dequeue failed");
                                tokio::time::sleep(IDLE_POLL).await;
                                continue;
                            }
                        };
                        if Self::process(&orchestrator, &delivery).await {
                            if let Err(err) = queue.ack(delivery.receipt).await {
                                error!(error = %err, "queue ack failed");
                            }
                        }
                    }
                    info!(worker_index, "worker stopped");
                })
            })
            .collect()
    }

    /// Process jobs until the queue is empty; used by the CLI drain entry
    pub async fn drain(&self) -> Result<DrainStats> {
        let mut stats = DrainStats::default();
        while let Some(delivery) = self.queue.dequeue().await? {
            if Self::process(&self.orchestrator, &delivery).await {
                self.queue.ack(delivery.receipt).await?;
                stats.processed += 1;
            } else {
                stats.failed += 1;
            }
        }
        Ok(stats)
    }
}
