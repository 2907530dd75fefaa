//! # Delivery Client
//!
//! Turns one batch of readings into one HTTP exchange.
//!
//! This module handles:
//! - Building the `{ locationData, additionalParams }` body
//! - Attaching the fixed JSON headers plus configured headers
//! - Classifying the answer into an [`Outcome`]
//!
//! Nothing here retries or sleeps; that is the job of the flush cycle.

pub mod transport;

use std::sync::Arc;
use tracing::{debug, warn};

use crate::batch::BatchPayload;
use crate::config::EndpointConfig;
use crate::error::DeliveryError;
use crate::reading::Reading;
use crate::retry::{classify_status, Outcome};

pub use transport::{DeliveryRequest, HttpTransport, Transport, TransportResponse};

const FIXED_HEADERS: [(&str, &str); 2] = [
    ("Content-Type", "application/json"),
    ("Accept", "application/json"),
];

/// Sends batches through a [`Transport`]
#[derive(Clone)]
pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient").finish_non_exhaustive()
    }
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Build the request for `batch` against `endpoint`.
    ///
    /// Configured headers replace a fixed header of the same name
    /// (case-insensitive). GET requests carry no body.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Transport` if the body cannot be serialized
    pub fn build_request(batch: &[Reading], endpoint: &EndpointConfig) -> Result<DeliveryRequest, DeliveryError> {
        let mut headers: Vec<(String, String)> = FIXED_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        for (name, value) in &endpoint.headers {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }

        let body = if endpoint.method.carries_body() {
            let payload = BatchPayload::new(batch, endpoint.extra_params.as_ref());
            Some(
                payload
                    .to_body()
                    .map_err(|e| DeliveryError::Transport(format!("failed to encode batch: {}", e)))?,
            )
        } else {
            None
        };

        Ok(DeliveryRequest {
            method: endpoint.method,
            url: endpoint.url.clone(),
            headers,
            body,
        })
    }

    /// Perform one attempt with a prepared request
    pub async fn send_request(&self, request: &DeliveryRequest, readings: usize) -> Outcome {
        match self.transport.execute(request).await {
            Ok(response) => {
                debug!(status = response.status, readings, "Endpoint responded");
                let outcome = classify_status(response.status, &response.body);
                if !outcome.is_success() {
                    warn!(status = response.status, body = %response.body, "Endpoint returned an error");
                }
                outcome
            }
            Err(err) => {
                warn!(error = %err, readings, "Network error during delivery");
                Outcome::RetryableFailure(err)
            }
        }
    }

    /// Build and send `batch` in one attempt
    pub async fn send(&self, batch: &[Reading], endpoint: &EndpointConfig) -> Outcome {
        match Self::build_request(batch, endpoint) {
            Ok(request) => self.send_request(&request, batch.len()).await,
            Err(err) => Outcome::RetryableFailure(err),
        }
    }
}
