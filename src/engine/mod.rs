//! # Delivery Engine
//!
//! Control surface tying the buffer, delivery client, retry policy and
//! circuit breaker together behind one scheduled worker.
//!
//! ## Lifecycle
//!
//! 1. [`DeliveryEngine::configure`] stores a validated endpoint snapshot
//! 2. [`DeliveryEngine::start`] spawns the worker, which flushes once per
//!    `flush_interval` (first flush after one full interval)
//! 3. Producers call [`DeliveryEngine::add`] at any time
//! 4. [`DeliveryEngine::stop`] cancels the worker and runs one final flush
//!    with a single attempt per batch
//!
//! Reconfiguring while running restarts the schedule with the new interval.
//! Buffered readings and circuit breaker state are kept.

mod cycle;

pub use cycle::FlushReport;

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant as TokioInstant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::buffer::BufferManager;
use crate::circuit::{CircuitBreaker, CircuitState};
use crate::config::{Config, EndpointConfig, EngineSettings};
use crate::delivery::{DeliveryClient, HttpTransport, Transport};
use crate::error::{Result, UplinkError};
use crate::reading::Reading;
use crate::retry::RetryPolicy;
use crate::time::{Clock, Sleeper, SystemClock, TokioSleeper};
use cycle::{run_cycle, CycleMode, Shared, ShutdownSignal};

/// Snapshot returned by [`DeliveryEngine::status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    /// Worker is running
    pub enabled: bool,
    /// Readings waiting in both buffers
    pub buffer_size: usize,
    /// Part of `buffer_size` that already failed delivery at least once
    pub retry_buffer_size: usize,
    pub healthy: bool,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    /// Readings dropped from the retry buffer since start-up
    pub evicted: u64,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Batching and delivery engine for location readings
pub struct DeliveryEngine {
    shared: Arc<Shared>,
    worker: parking_lot::Mutex<Option<Worker>>,
}

/// Builder for [`DeliveryEngine`] with injectable timing
pub struct DeliveryEngineBuilder {
    settings: EngineSettings,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl DeliveryEngineBuilder {
    /// Replace the retry sleeper (defaults to the tokio timer)
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the cooldown clock (defaults to [`SystemClock`])
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> DeliveryEngine {
        let (endpoint, _) = watch::channel(None);

        let shared = Shared {
            buffer: BufferManager::new(self.settings.buffer.retry_capacity),
            breaker: parking_lot::Mutex::new(CircuitBreaker::from_config(&self.settings.circuit)),
            client: DeliveryClient::new(self.transport),
            policy: RetryPolicy::from_config(&self.settings.delivery),
            batch_size: self.settings.delivery.batch_size,
            sleeper: self.sleeper,
            clock: self.clock,
            endpoint,
            cycle_lock: tokio::sync::Mutex::new(()),
        };

        DeliveryEngine {
            shared: Arc::new(shared),
            worker: parking_lot::Mutex::new(None),
        }
    }
}

impl DeliveryEngine {
    /// Start building an engine that delivers through `transport`
    pub fn builder(settings: EngineSettings, transport: Arc<dyn Transport>) -> DeliveryEngineBuilder {
        DeliveryEngineBuilder {
            settings,
            transport,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
        }
    }

    /// Engine with the default tokio sleeper and system clock
    pub fn new(settings: EngineSettings, transport: Arc<dyn Transport>) -> Self {
        Self::builder(settings, transport).build()
    }

    /// Build an HTTP-backed engine from a loaded configuration and apply
    /// its endpoint.
    ///
    /// # Arguments
    ///
    /// * `config` - Full configuration, usually from [`Config::load`]
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use location_uplink::config::Config;
    /// use location_uplink::engine::DeliveryEngine;
    ///
    /// # async fn run() -> location_uplink::error::Result<()> {
    /// let config = Config::load("config/default.toml")?;
    /// let engine = DeliveryEngine::from_config(&config)?;
    /// engine.start()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = config.engine_settings();
        settings.validate()?;

        let transport = HttpTransport::new(&settings.delivery)?;
        let engine = Self::new(settings, Arc::new(transport));
        engine.configure(config.endpoint.clone())?;
        Ok(engine)
    }

    /// Validate and install a new endpoint.
    ///
    /// A running worker picks up the new interval immediately. On error the
    /// previous endpoint stays in place.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::Config` if the endpoint fails validation
    pub fn configure(&self, endpoint: EndpointConfig) -> Result<()> {
        endpoint.validate()?;

        info!(
            url = %endpoint.url,
            method = %endpoint.method,
            interval_secs = endpoint.flush_interval_secs,
            "Endpoint configured"
        );
        self.shared.endpoint.send_replace(Some(Arc::new(endpoint)));
        Ok(())
    }

    /// Spawn the scheduled flush worker.
    ///
    /// Calling `start` on a running engine is a no-op.
    ///
    /// # Errors
    ///
    /// * `UplinkError::NotConfigured` - no endpoint has been configured
    /// * `UplinkError::NoRuntime` - called outside a tokio runtime
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("Delivery engine already running");
            return Ok(());
        }

        let interval = match self.shared.endpoint.borrow().as_ref() {
            Some(endpoint) => endpoint.flush_interval(),
            None => return Err(UplinkError::NotConfigured),
        };

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| UplinkError::NoRuntime)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let endpoint_rx = self.shared.endpoint.subscribe();
        let shared = Arc::clone(&self.shared);

        let handle = runtime.spawn(run_worker(shared, ShutdownSignal::new(shutdown_rx), endpoint_rx));

        *worker = Some(Worker {
            shutdown: shutdown_tx,
            handle,
        });

        info!(interval_secs = interval.as_secs(), "Delivery engine started");
        Ok(())
    }

    /// Stop the worker and run a final single-attempt flush.
    ///
    /// Readings that cannot be delivered stay buffered. Safe to call when
    /// the engine is not running.
    pub async fn stop(&self) -> FlushReport {
        let worker = self.worker.lock().take();

        if let Some(worker) = worker {
            worker.shutdown.send_replace(true);
            if let Err(e) = worker.handle.await {
                warn!(error = %e, "Delivery worker ended abnormally");
            }
            info!("Delivery engine stopped");
        }

        let report = run_cycle(&self.shared, CycleMode::Final, &mut ShutdownSignal::never()).await;
        if report.requeued > 0 {
            warn!(readings = report.requeued, "Final flush left readings buffered");
        }
        report
    }

    /// Run one full flush cycle now, serialised with the worker
    pub async fn flush(&self) -> FlushReport {
        let mut shutdown = self.shutdown_signal();
        run_cycle(&self.shared, CycleMode::Scheduled, &mut shutdown).await
    }

    /// Queue a reading for the next flush. Never blocks on the network.
    pub fn add(&self, reading: Reading) {
        self.shared.buffer.add(reading);
    }

    pub fn status(&self) -> EngineStatus {
        let breaker = self.shared.breaker.lock();
        EngineStatus {
            enabled: self.is_running(),
            buffer_size: self.shared.buffer.size(),
            retry_buffer_size: self.shared.buffer.retry_len(),
            healthy: breaker.is_healthy(),
            circuit_state: breaker.state(),
            consecutive_failures: breaker.consecutive_failures(),
            evicted: self.shared.buffer.evicted(),
        }
    }

    /// Drop every buffered reading
    pub fn clear(&self) {
        self.shared.buffer.clear();
        info!("Location buffers cleared");
    }

    pub fn reset_circuit_breaker(&self) {
        self.shared.breaker.lock().reset();
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    fn shutdown_signal(&self) -> ShutdownSignal {
        match self.worker.lock().as_ref() {
            Some(worker) => ShutdownSignal::new(worker.shutdown.subscribe()),
            None => ShutdownSignal::never(),
        }
    }
}

impl Drop for DeliveryEngine {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.shutdown.send_replace(true);
        }
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    mut shutdown: ShutdownSignal,
    mut endpoint_rx: watch::Receiver<Option<Arc<EndpointConfig>>>,
) {
    let Some(mut period) = endpoint_rx.borrow_and_update().as_ref().map(|e| e.flush_interval()) else {
        return;
    };

    let mut ticker = interval_at(TokioInstant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.triggered() => {
                debug!("Delivery worker received shutdown");
                break;
            }
            _ = ticker.tick() => {
                run_cycle(&shared, CycleMode::Scheduled, &mut shutdown).await;
            }
            changed = endpoint_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = endpoint_rx.borrow_and_update().as_ref().map(|e| e.flush_interval());
                if let Some(next) = next {
                    period = next;
                    ticker = interval_at(TokioInstant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    info!(interval_secs = period.as_secs(), "Flush schedule restarted");
                }
            }
        }
    }
}
