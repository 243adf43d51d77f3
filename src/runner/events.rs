//! Per-execution event hub
//!
//! Frames are fanned out to streaming subscribers over broadcast channels
//! and never stored; a subscriber that lags simply misses frames and should
//! fall back to the status endpoint.

use crate::domain::{EventFrame, EventKind, ExecutionId};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

struct Channel {
    sender: broadcast::Sender<EventFrame>,
    sequence: Arc<AtomicU64>,
}

/// Hub of live execution event streams
#[derive(Default)]
pub struct ExecutionEvents {
    channels: RwLock<HashMap<ExecutionId, Channel>>,
}

impl ExecutionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, execution_id: &ExecutionId) -> (broadcast::Sender<EventFrame>, Arc<AtomicU64>) {
        {
            let channels = self.channels.read();
            if let Some(channel) = channels.get(execution_id) {
                return (channel.sender.clone(), Arc::clone(&channel.sequence));
            }
        }
        let mut channels = self.channels.write();
        let channel = channels.entry(execution_id.clone()).or_insert_with(|| {
            let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
            Channel {
                sender,
                sequence: Arc::new(AtomicU64::new(0)),
            }
        });
        (channel.sender.clone(), Arc::clone(&channel.sequence))
    }

    /// Publish a frame; dropped when nobody subscribes
    pub fn publish(&self, execution_id: &ExecutionId, kind: EventKind, payload: serde_json::Value) {
        let (sender, sequence) = self.channel(execution_id);
        let frame = EventFrame {
            execution_id: execution_id.clone(),
            sequence: sequence.fetch_add(1, Ordering::Relaxed) + 1,
            kind,
            payload,
            at: Utc::now(),
        };
        let _ = sender.send(frame);
    }

    /// Subscribe to an execution's live frames
    pub fn subscribe(&self, execution_id: &ExecutionId) -> broadcast::Receiver<EventFrame> {
        let (sender, _) = self.channel(execution_id);
        sender.subscribe()
    }

    /// Emit the terminal `complete` frame and drop the channel
    pub fn complete(&self, execution_id: &ExecutionId) {
        self.publish(execution_id, EventKind::Complete, serde_json::Value::Null);
        self.channels.write().remove(execution_id);
    }

    /// Drop a channel nobody listens to (e.g. a rejected subscription)
    pub fn prune(&self, execution_id: &ExecutionId) {
        let mut channels = self.channels.write();
        let abandoned = channels
            .get(execution_id)
            .is_some_and(|channel| channel.sender.receiver_count() == 0);
        if abandoned {
            channels.remove(execution_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_carry_monotonic_sequences() {
        let hub = ExecutionEvents::new();
        let execution_id = ExecutionId::generate();
        let mut rx = hub.subscribe(&execution_id);

        hub.publish(
            &execution_id,
            EventKind::CaseStarted,
            serde_json::json!({"case": 1}),
        );
        hub.publish(
            &execution_id,
            EventKind::CaseFinished,
            serde_json::json!({"case": 1}),
        );
        hub.complete(&execution_id);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let last = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(last.sequence, 3);
        assert!(last.is_final());
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_harmless() {
        let hub = ExecutionEvents::new();
        let execution_id = ExecutionId::generate();
        hub.publish(&execution_id, EventKind::Thinking, serde_json::Value::Null);
        hub.complete(&execution_id);
    }

    #[tokio::test]
    async fn prune_keeps_channels_with_live_subscribers() {
        let hub = ExecutionEvents::new();
        let execution_id = ExecutionId::generate();
        let mut rx = hub.subscribe(&execution_id);

        // A live subscriber keeps the channel
        hub.prune(&execution_id);
        hub.publish(&execution_id, EventKind::Thinking, serde_json::Value::Null);
        assert_eq!(rx.recv().await.unwrap().sequence, 1);

        // Once abandoned, the channel goes away
        drop(rx);
        hub.prune(&execution_id);
        assert!(hub.channels.read().is_empty());
    }

    #[tokio::test]
    async fn channels_are_independent_per_execution() {
        let hub = ExecutionEvents::new();
        let a = ExecutionId::generate();
        let b = ExecutionId::generate();
        let mut rx_a = hub.subscribe(&a);

        hub.publish(&b, EventKind::CaseStarted, serde_json::Value::Null);
        hub.publish(&a, EventKind::CaseStarted, serde_json::json!({"mine": true}));

        let frame = rx_a.recv().await.unwrap();
        assert_eq!(frame.execution_id, a);
        assert_eq!(frame.sequence, 1);
    }
}
