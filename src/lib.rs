//! # Location Uplink Library
//!
//! Buffers location readings and delivers them in batches to an HTTP
//! endpoint, with retries, exponential backoff and a circuit breaker.
//!
//! Producers hand readings to a [`DeliveryEngine`](engine::DeliveryEngine)
//! and never wait on the network. A single worker flushes on a fixed
//! interval; failed batches go to a bounded retry buffer that drops its
//! oldest entries when full.

pub mod batch;
pub mod buffer;
pub mod circuit;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod logging;
pub mod reading;
pub mod retry;
pub mod time;

pub use engine::{DeliveryEngine, EngineStatus, FlushReport};
pub use reading::Reading;
