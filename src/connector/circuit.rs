//! Failure-rate-driven circuit breaker
//!
//! A rolling window of call outcomes opens the circuit when the failure
//! rate crosses the threshold; open-state calls fail fast. After the
//! cooldown one probe call is allowed: success closes the circuit, failure
//! re-opens it.

use crate::connector::ConnectorError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Closed,
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

struct Inner {
    state: State,
    outcomes: VecDeque<(Instant, bool)>,
}

/// Breaker configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitConfig {
    /// Failure rate in [0, 1] at which the circuit opens
    pub failure_threshold: f64,
    /// Rolling window over which outcomes are counted
    pub window: Duration,
    /// Minimum calls in the window before the rate is considered
    pub min_calls: usize,
    /// How long the circuit stays open before allowing a probe
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            window: Duration::from_secs(60),
            min_calls: 20,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Process-wide circuit breaker shared by all connector calls
pub struct CircuitBreaker {
    config: CircuitConfig,
    inner: Mutex<Inner>,
    closed: Notify,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                outcomes: VecDeque::new(),
            }),
            closed: Notify::new(),
        }
    }

    /// Gate a call. `CircuitOpen` while open; in half-open state exactly one
    /// probe is admitted and the rest fail fast.
    pub fn check(&self) -> std::result::Result<(), ConnectorError> {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => Ok(()),
            State::Open { until } => {
                if Instant::now() >= until {
                    inner.state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    info!("circuit half-open, admitting probe call");
                    Ok(())
                } else {
                    Err(ConnectorError::CircuitOpen)
                }
            }
            State::HalfOpen { probe_in_flight } => {
                if probe_in_flight {
                    Err(ConnectorError::CircuitOpen)
                } else {
                    inner.state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    Ok(())
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::HalfOpen { .. } => {
                inner.state = State::Closed;
                inner.outcomes.clear();
                info!("circuit closed after successful probe");
                drop(inner);
                self.closed.notify_waiters();
            }
            State::Closed => {
                let now = Instant::now();
                inner.outcomes.push_back((now, true));
                self.evict(&mut inner, now);
            }
            State::Open { .. } => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            State::HalfOpen { .. } => {
                inner.state = State::Open {
                    until: now + self.config.cooldown,
                };
                warn!("probe call failed, circuit re-opened");
            }
            State::Closed => {
                inner.outcomes.push_back((now, false));
                self.evict(&mut inner, now);
                let total = inner.outcomes.len();
                if total >= self.config.min_calls {
                    let failures = inner.outcomes.iter().filter(|(_, ok)| !ok).count();
                    let rate = failures as f64 / total as f64;
                    if rate >= self.config.failure_threshold {
                        inner.state = State::Open {
                            until: now + self.config.cooldown,
                        };
                        warn!(
                            failure_rate = rate,
                            window_calls = total,
                            "failure rate over threshold, circuit opened"
                        );
                    }
                }
            }
            State::Open { .. } => {}
        }
    }

    fn evict(&self, inner: &mut Inner, now: Instant) {
        while let Some((at, _)) = inner.outcomes.front() {
            if now.duration_since(*at) > self.config.window {
                inner.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.inner.lock().state {
            State::Closed => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Suspend until the circuit admits calls again: closed, or open with
    /// the cooldown elapsed (the next call becomes the probe). Used by the
    /// orchestrator for backpressure instead of busy-spinning.
    pub async fn wait_until_closed(&self) {
        loop {
            let sleep_for = {
                let inner = self.inner.lock();
                match inner.state {
                    State::Closed => return,
                    State::Open { until } => {
                        let remaining = until.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            return;
                        }
                        remaining
                    }
                    State::HalfOpen { .. } => self.config.cooldown.min(Duration::from_millis(250)),
                }
            };
            tokio::select! {
                () = self.closed.notified() => {}
                () = tokio::time::sleep(sleep_for.max(Duration::from_millis(10))) => {}
            }
        }
    }
}
