//! One flush cycle: drain → split → gate → deliver with retries → requeue.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::batch::split_batches;
use crate::buffer::BufferManager;
use crate::circuit::{CircuitBreaker, Permit};
use crate::config::EndpointConfig;
use crate::delivery::DeliveryClient;
use crate::reading::Reading;
use crate::retry::{Outcome, RetryPolicy};
use crate::time::{Clock, Sleeper};

/// State shared between the control surface and the worker task
pub(crate) struct Shared {
    pub buffer: BufferManager,
    pub breaker: parking_lot::Mutex<CircuitBreaker>,
    pub client: DeliveryClient,
    pub policy: RetryPolicy,
    pub batch_size: usize,
    pub sleeper: Arc<dyn Sleeper>,
    pub clock: Arc<dyn Clock>,
    pub endpoint: watch::Sender<Option<Arc<EndpointConfig>>>,
    /// Held for the whole cycle so cycles never overlap
    pub cycle_lock: tokio::sync::Mutex<()>,
}

/// How hard a cycle tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleMode {
    /// Full retry budget per batch
    Scheduled,
    /// One attempt per batch, used while shutting down
    Final,
}

/// Summary of one flush cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Readings taken out of the buffers
    pub drained: usize,
    /// HTTP requests issued, including retries
    pub requests: usize,
    pub delivered: usize,
    /// Readings discarded after a terminal failure
    pub dropped: usize,
    /// Readings handed back to the retry buffer
    pub requeued: usize,
    /// Batches not sent because the circuit breaker was open
    pub skipped_batches: usize,
}

/// Shutdown flag that can be checked or awaited
#[derive(Clone)]
pub(crate) struct ShutdownSignal(Option<watch::Receiver<bool>>);

impl ShutdownSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self(Some(rx))
    }

    /// A signal that never fires
    pub fn never() -> Self {
        Self(None)
    }

    pub fn is_triggered(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once shutdown is requested or the engine is gone
    pub async fn triggered(&mut self) {
        match &mut self.0 {
            Some(rx) => {
                while !*rx.borrow_and_update() {
                    if rx.changed().await.is_err() {
                        return;
                    }
                }
            }
            None => std::future::pending::<()>().await,
        }
    }
}

enum BatchFate {
    Delivered,
    Dropped,
    Requeue,
    Skipped,
}

/// Run one flush cycle against the current endpoint snapshot
pub(crate) async fn run_cycle(shared: &Shared, mode: CycleMode, shutdown: &mut ShutdownSignal) -> FlushReport {
    let _cycle = shared.cycle_lock.lock().await;
    let mut report = FlushReport::default();

    let endpoint = shared.endpoint.borrow().clone();
    let Some(endpoint) = endpoint else {
        debug!("No endpoint configured, skipping flush");
        return report;
    };

    let readings = shared.buffer.drain_all();
    if readings.is_empty() {
        debug!("No location data to send");
        return report;
    }

    report.drained = readings.len();
    info!(readings = readings.len(), ?mode, "Flushing buffered readings");

    let mut undelivered: Vec<Reading> = Vec::new();

    for batch in split_batches(readings, shared.batch_size) {
        if shutdown.is_triggered() {
            undelivered.extend(batch);
            continue;
        }

        match deliver_batch(shared, &batch, &endpoint, mode, shutdown, &mut report).await {
            BatchFate::Delivered => report.delivered += batch.len(),
            BatchFate::Dropped => report.dropped += batch.len(),
            BatchFate::Skipped => {
                report.skipped_batches += 1;
                undelivered.extend(batch);
            }
            BatchFate::Requeue => undelivered.extend(batch),
        }
    }

    report.requeued = undelivered.len();
    if !undelivered.is_empty() {
        warn!(readings = undelivered.len(), "Delivery incomplete, readings added to retry buffer");
        shared.buffer.requeue_failed(undelivered);
    }

    info!(
        delivered = report.delivered,
        dropped = report.dropped,
        requeued = report.requeued,
        requests = report.requests,
        "Flush cycle finished"
    );
    report
}

async fn deliver_batch(
    shared: &Shared,
    batch: &[Reading],
    endpoint: &EndpointConfig,
    mode: CycleMode,
    shutdown: &mut ShutdownSignal,
    report: &mut FlushReport,
) -> BatchFate {
    let permit = shared.breaker.lock().acquire(shared.clock.now());

    let policy = match (permit, mode) {
        (Permit::Rejected, _) => {
            debug!(readings = batch.len(), "Circuit breaker is open, skipping delivery");
            return BatchFate::Skipped;
        }
        (Permit::Probe, _) | (Permit::Granted, CycleMode::Final) => shared.policy.with_max_attempts(1),
        (Permit::Granted, CycleMode::Scheduled) => shared.policy.clone(),
    };

    let request = match DeliveryClient::build_request(batch, endpoint) {
        Ok(request) => request,
        Err(err) => {
            error!(error = %err, "Could not build delivery request");
            if permit == Permit::Probe {
                shared.breaker.lock().release_probe();
            }
            return BatchFate::Requeue;
        }
    };

    let mut attempt: u32 = 0;
    loop {
        report.requests += 1;
        let outcome = shared.client.send_request(&request, batch.len()).await;

        match outcome {
            Outcome::Success => {
                shared.breaker.lock().record_success();
                debug!(readings = batch.len(), "Batch delivered");
                return BatchFate::Delivered;
            }
            Outcome::TerminalFailure(err) => {
                error!(error = %err, readings = batch.len(), "Dropping batch after terminal failure");
                {
                    let mut breaker = shared.breaker.lock();
                    if err.counts_toward_breaker() {
                        breaker.record_failure(shared.clock.now());
                    } else if permit == Permit::Probe {
                        breaker.release_probe();
                    }
                }
                return BatchFate::Dropped;
            }
            Outcome::DeferredFailure(err) => {
                warn!(error = %err, readings = batch.len(), "Unexpected response, keeping batch for next cycle");
                shared.breaker.lock().record_failure(shared.clock.now());
                return BatchFate::Requeue;
            }
            Outcome::RetryableFailure(err) => {
                if !policy.should_retry(attempt) {
                    warn!(error = %err, attempts = attempt + 1, "Max retry attempts reached");
                    shared.breaker.lock().record_failure(shared.clock.now());
                    return BatchFate::Requeue;
                }

                let delay = policy.delay_for(attempt, &err);
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = attempt + 1,
                    error = %err,
                    "Retrying delivery"
                );

                tokio::select! {
                    _ = shared.sleeper.sleep(delay) => {}
                    _ = shutdown.triggered() => {
                        info!(readings = batch.len(), "Shutdown during backoff, requeueing batch");
                        if permit == Permit::Probe {
                            shared.breaker.lock().release_probe();
                        }
                        return BatchFate::Requeue;
                    }
                }

                attempt += 1;
            }
        }
    }
}
