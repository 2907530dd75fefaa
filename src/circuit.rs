//! # Circuit Breaker
//!
//! Counts consecutive failed batches across flush cycles and stops the
//! engine from contacting an endpoint that is clearly down.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                │ cooldown elapsed
//!     │ probe succeeds                 ▼
//!     └───────────────────────────  HalfOpen ──probe fails──▶ Open
//! ```
//!
//! Time is passed in by the caller so the breaker itself stays a plain
//! state machine.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::CircuitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// What the breaker allows for the next batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Normal delivery with the full retry budget
    Granted,
    /// Single probe attempt while half-open
    Probe,
    /// Skip the network entirely
    Rejected,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn from_config(config: &CircuitConfig) -> Self {
        Self::new(config.failure_threshold, config.cooldown())
    }

    /// Ask whether a batch may be sent at `now`.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and
    /// hands out exactly one [`Permit::Probe`]; further requests are rejected
    /// until that probe is resolved.
    pub fn acquire(&mut self, now: Instant) -> Permit {
        match self.state {
            CircuitState::Closed => Permit::Granted,
            CircuitState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                if now.saturating_duration_since(opened_at) >= self.cooldown {
                    info!("Circuit breaker cooldown elapsed, allowing probe");
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                    Permit::Probe
                } else {
                    Permit::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    Permit::Rejected
                } else {
                    self.probe_in_flight = true;
                    Permit::Probe
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            info!("Circuit breaker closed after successful delivery");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.probe_in_flight = false;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.probe_in_flight = false;

        match self.state {
            CircuitState::HalfOpen => {
                warn!(
                    consecutive_failures = self.consecutive_failures,
                    "Circuit breaker probe failed, reopening"
                );
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
            }
            CircuitState::Closed if self.consecutive_failures >= self.failure_threshold => {
                warn!(
                    consecutive_failures = self.consecutive_failures,
                    cooldown_secs = self.cooldown.as_secs(),
                    "Circuit breaker opened due to consecutive failures"
                );
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
            }
            _ => {
                warn!(consecutive_failures = self.consecutive_failures, "Delivery failure recorded");
            }
        }
    }

    /// Give back an outstanding probe without judging the endpoint
    pub fn release_probe(&mut self) {
        self.probe_in_flight = false;
    }

    /// Force `Closed` with a zero counter, ignoring any cooldown
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.probe_in_flight = false;
        info!("Circuit breaker manually reset");
    }

    pub fn is_healthy(&self) -> bool {
        self.state != CircuitState::Open && self.consecutive_failures < self.failure_threshold
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }
}
