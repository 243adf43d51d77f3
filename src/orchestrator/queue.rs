//! Work queue contract and in-memory implementation
//!
//! Single job type `RunExecution`. Guarantees: at-least-once delivery, a
//! visibility timeout at least as long as the per-execution wall clock, and
//! dead-letter routing after the configured number of redeliveries.

use crate::domain::{ExecutionId, TenantId};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::warn;

/// The single job type processed by workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunExecutionJob {
    pub execution_id: ExecutionId,
    pub tenant_id: TenantId,
}

/// One delivery of a job; holds the receipt used to acknowledge it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub job: RunExecutionJob,
    pub receipt: u64,
    pub delivery_count: u32,
}

/// Queue port; implementations must provide visibility-timeout semantics
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, job: RunExecutionJob) -> Result<()>;

    /// Non-blocking pop; `None` when no job is ready
    async fn dequeue(&self) -> Result<Option<Delivery>>;

    /// Acknowledge a delivery, removing the job permanently
    async fn ack(&self, receipt: u64) -> Result<()>;

    /// Ready jobs (excluding in-flight ones), for metrics
    async fn depth(&self) -> usize;

    /// Wait until work may be available or the timeout elapses
    async fn wait_for_work(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}

struct ReadyEntry {
    job: RunExecutionJob,
    delivery_count: u32,
}

struct InFlight {
    job: RunExecutionJob,
    delivery_count: u32,
    deadline: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ReadyEntry>,
    inflight: HashMap<u64, InFlight>,
    dead_letters: Vec<RunExecutionJob>,
    next_receipt: u64,
}

/// Process-local queue used for single-node deployments and tests
pub struct InMemoryQueue {
    visibility_timeout: Duration,
    max_deliveries: u32,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration, max_deliveries: u32) -> Self {
        Self {
            visibility_timeout,
            max_deliveries: max_deliveries.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Move expired in-flight jobs back to ready, dead-lettering those that
    /// exhausted their deliveries
    fn reclaim(&self, state: &mut QueueState, now: Instant) {
        let expired: Vec<u64> = state
            .inflight
            .iter()
            .filter(|(_, inflight)| now >= inflight.deadline)
            .map(|(receipt, _)| *receipt)
            .collect();
        for receipt in expired {
            if let Some(inflight) = state.inflight.remove(&receipt) {
                if inflight.delivery_count >= self.max_deliveries {
                    warn!(
                        execution_id = %inflight.job.execution_id,
                        deliveries = inflight.delivery_count,
                        "job exhausted deliveries, routing to dead letters"
                    );
                    state.dead_letters.push(inflight.job);
                } else {
                    state.ready.push_back(ReadyEntry {
                        job: inflight.job,
                        delivery_count: inflight.delivery_count,
                    });
                }
            }
        }
    }

    /// Jobs routed to the dead-letter queue
    pub async fn dead_letters(&self) -> Vec<RunExecutionJob> {
        self.state.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn enqueue(&self, job: RunExecutionJob) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.ready.push_back(ReadyEntry {
                job,
                delivery_count: 0,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        self.reclaim(&mut state, now);

        let Some(entry) = state.ready.pop_front() else {
            return Ok(None);
        };
        let receipt = state.next_receipt;
        state.next_receipt += 1;
        let delivery_count = entry.delivery_count + 1;
        state.inflight.insert(
            receipt,
            InFlight {
                job: entry.job.clone(),
                delivery_count,
                deadline: now + self.visibility_timeout,
            },
        );
        Ok(Some(Delivery {
            job: entry.job,
            receipt,
            delivery_count,
        }))
    }

    async fn ack(&self, receipt: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.inflight.remove(&receipt);
        Ok(())
    }

    async fn depth(&self) -> usize {
        let mut state = self.state.lock().await;
        self.reclaim(&mut state, Instant::now());
        state.ready.len()
    }

    async fn wait_for_work(&self, timeout: Duration) {
        tokio::select! {
            () = self.notify.notified() => {}
            () = tokio::time::sleep(timeout) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> RunExecutionJob {
        RunExecutionJob {
            execution_id: ExecutionId::generate(),
            tenant_id: TenantId::generate(),
        }
    }

    #[tokio::test]
    async fn delivery_and_ack_remove_the_job() {
        let queue = InMemoryQueue::new(Duration::from_secs(60), 3);
        queue.enqueue(job()).await.unwrap();
        assert_eq!(queue.depth().await, 1);

        let delivery = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(delivery.delivery_count, 1);
        assert_eq!(queue.depth().await, 0);
        assert!(queue.dequeue().await.unwrap().is_none());

        queue.ack(delivery.receipt).await.unwrap();
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unacked_jobs_become_visible_after_the_timeout() {
        let queue = InMemoryQueue::new(Duration::from_millis(20), 3);
        let original = job();
        queue.enqueue(original.clone()).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert!(queue.dequeue().await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(second.job, original);
        assert_eq!(second.delivery_count, 2);
        assert_ne!(first.receipt, second.receipt);
    }

    #[tokio::test]
    async fn exhausted_deliveries_go_to_the_dead_letter_queue() {
        let queue = InMemoryQueue::new(Duration::from_millis(5), 3);
        let original = job();
        queue.enqueue(original.clone()).await.unwrap();

        for _ in 0..3 {
            let delivery = queue.dequeue().await.unwrap().unwrap();
            assert_eq!(delivery.job, original);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Third delivery expired without an ack: the job is dead-lettered
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.dead_letters().await, vec![original]);
    }

    #[tokio::test]
    async fn wait_for_work_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(InMemoryQueue::new(Duration::from_secs(60), 3));
        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move {
                queue.wait_for_work(Duration::from_secs(5)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(job()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
