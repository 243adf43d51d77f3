//! Short-lived idempotency window
//!
//! When the provider has no native idempotency support, the connector
//! dedupes on `(tenant_id, idempotency_key)` in memory: a repeated request
//! within the window returns the recorded response without a provider call.

use crate::connector::InvokeResponse;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// In-memory response cache keyed by the caller's idempotency key
pub struct DedupeWindow {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, InvokeResponse)>>,
}

impl DedupeWindow {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<InvokeResponse> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((at, response)) if at.elapsed() <= self.ttl => Some(response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, response: InvokeResponse) {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        // Opportunistic eviction keeps the map bounded without a sweeper task
        entries.retain(|_, (at, _)| now.duration_since(*at) <= self.ttl);
        entries.insert(key, (now, response));
    }
}
