//! # Error Types
//!
//! Custom error types for Location Uplink using `thiserror`.

use thiserror::Error;

/// Main error type for Location Uplink
#[derive(Debug, Error)]
pub enum UplinkError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine was asked to run before an endpoint was configured
    #[error("No delivery endpoint configured")]
    NotConfigured,

    /// Scheduler needs a tokio runtime to spawn its worker
    #[error("Engine must be started from within a tokio runtime")]
    NoRuntime,

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Logging subscriber could not be installed
    #[error("Logging setup error: {0}")]
    Logging(String),
}

/// Result type alias for Location Uplink
pub type Result<T> = std::result::Result<T, UplinkError>;

/// Why a single delivery attempt did not succeed.
///
/// Carried inside [`Outcome`](crate::retry::Outcome) so the retry loop can
/// decide between retrying, requeueing and dropping a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// DNS, connect, timeout or body I/O failure. Always retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// 400/422: the endpoint rejected the payload itself.
    #[error("request rejected with HTTP {status}: {body}")]
    Client { status: u16, body: String },

    /// 401/403: credentials are wrong or missing.
    #[error("authentication rejected with HTTP {status}")]
    Auth { status: u16 },

    /// 408/429/5xx: the endpoint is overloaded or failing.
    #[error("server error HTTP {status}")]
    Server { status: u16 },

    /// Any other non-2xx status.
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus { status: u16 },
}

impl DeliveryError {
    /// HTTP status associated with this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Transport(_) => None,
            DeliveryError::Client { status, .. }
            | DeliveryError::Auth { status }
            | DeliveryError::Server { status }
            | DeliveryError::UnexpectedStatus { status } => Some(*status),
        }
    }

    /// Whether the endpoint asked us to slow down (HTTP 429)
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }

    /// Whether this failure should count toward opening the circuit breaker
    /// when it terminates a batch.
    pub fn counts_toward_breaker(&self) -> bool {
        !matches!(self, DeliveryError::Client { .. })
    }
}
