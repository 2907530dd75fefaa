//! Trait abstraction for the HTTP exchange to enable testing

use async_trait::async_trait;

use crate::config::{DeliveryConfig, HttpMethod};
use crate::error::{DeliveryError, Result, UplinkError};

/// Fully formed request for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// `None` for GET
    pub body: Option<Vec<u8>>,
}

impl DeliveryRequest {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status line and body of an answered request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Trait for the single HTTP exchange behind a delivery attempt.
///
/// Implementations return `Err` only for transport-level failures; any HTTP
/// status, including 4xx/5xx, is an `Ok` response.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &DeliveryRequest) -> std::result::Result<TransportResponse, DeliveryError>;
}

/// Transport backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client with the configured connect/read timeouts and user agent.
    ///
    /// The whole exchange is capped at connect + read timeout.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::HttpClient` if the TLS backend cannot be initialised
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .timeout(total_timeout(config))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| UplinkError::HttpClient(e.to_string()))?;

        Ok(Self { client })
    }
}

fn total_timeout(config: &DeliveryConfig) -> std::time::Duration {
    config.connect_timeout() + config.read_timeout()
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &DeliveryRequest) -> std::result::Result<TransportResponse, DeliveryError> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &request.url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(format!("failed to read response body: {}", e)))?;

        Ok(TransportResponse { status, body })
    }
}
