//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! The endpoint section can also be built in code and handed to
//! [`DeliveryEngine::configure`](crate::engine::DeliveryEngine::configure);
//! the remaining sections become the engine's [`EngineSettings`].

use reqwest::header::{HeaderName, HeaderValue};
use serde::de::Error;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, UplinkError};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub circuit: CircuitConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP verb used for delivery requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
        }
    }

    /// GET requests are sent without a body
    pub fn carries_body(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            other => Err(format!("unsupported HTTP method '{}' (expected GET, POST, PUT or PATCH)", other)),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Remote endpoint snapshot.
///
/// Swapped as a whole by `configure`; a flush cycle always works against a
/// single snapshot.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EndpointConfig {
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Merged into every payload as `additionalParams`
    #[serde(default)]
    pub extra_params: Option<Map<String, Value>>,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

/// Batching, retry and HTTP client settings
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DeliveryConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_rate_limit_floor_ms")]
    pub rate_limit_floor_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Buffer limits
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BufferConfig {
    #[serde(default = "default_retry_capacity")]
    pub retry_capacity: usize,
}

/// Circuit breaker thresholds
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CircuitConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write a daily-rolling log file here in addition to stderr
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

/// The engine-side sections of [`Config`], without the endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineSettings {
    pub delivery: DeliveryConfig,
    pub buffer: BufferConfig,
    pub circuit: CircuitConfig,
}

// Default value functions
fn default_flush_interval_secs() -> u64 { 300 }

fn default_batch_size() -> usize { 100 }
fn default_max_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 5000 }
fn default_max_delay_ms() -> u64 { 120_000 }
fn default_rate_limit_floor_ms() -> u64 { 60_000 }
fn default_jitter_ms() -> u64 { 1000 }
fn default_connect_timeout_secs() -> u64 { 30 }
fn default_read_timeout_secs() -> u64 { 60 }
fn default_user_agent() -> String { format!("location-uplink/{}", env!("CARGO_PKG_VERSION")) }

fn default_retry_capacity() -> usize { 1000 }

fn default_failure_threshold() -> u32 { 5 }
fn default_cooldown_secs() -> u64 { 300 }

fn default_log_level() -> String { "info".to_string() }
fn default_status_interval_secs() -> u64 { 60 }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            rate_limit_floor_ms: default_rate_limit_floor_ms(),
            jitter_ms: default_jitter_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { retry_capacity: default_retry_capacity() }
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            status_interval_secs: default_status_interval_secs(),
        }
    }
}

fn invalid(msg: impl fmt::Display) -> UplinkError {
    UplinkError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use location_uplink::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Split off the engine-side sections
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            delivery: self.delivery.clone(),
            buffer: self.buffer.clone(),
            circuit: self.circuit.clone(),
        }
    }

    /// Validate every section
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range value found
    pub fn validate(&self) -> Result<()> {
        self.endpoint.validate()?;
        self.engine_settings().validate()?;

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("logging level must be one of: trace, debug, info, warn, error"));
        }

        if let Some(dir) = &self.logging.directory {
            if dir.is_empty() {
                return Err(invalid("logging directory cannot be empty when set"));
            }
        }

        if self.logging.status_interval_secs == 0 {
            return Err(invalid("status_interval_secs must be greater than 0"));
        }

        Ok(())
    }
}

impl EndpointConfig {
    /// Endpoint with default method (POST), no headers, no extras
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::default(),
            headers: BTreeMap::new(),
            extra_params: None,
            flush_interval_secs: default_flush_interval_secs(),
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_extra_params(mut self, params: Map<String, Value>) -> Self {
        self.extra_params = Some(params);
        self
    }

    pub fn with_flush_interval_secs(mut self, secs: u64) -> Self {
        self.flush_interval_secs = secs;
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Validate the endpoint snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the URL does not parse or is not http(s), the
    /// interval is outside 1..=86400 seconds, or a header cannot be sent
    /// over HTTP
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(invalid("endpoint url cannot be empty"));
        }

        let url = reqwest::Url::parse(self.url.trim())
            .map_err(|e| invalid(format!("endpoint url is not valid: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("endpoint url must start with http:// or https://"));
        }

        if self.flush_interval_secs == 0 || self.flush_interval_secs > 86_400 {
            return Err(invalid("flush_interval_secs must be between 1 and 86400"));
        }

        for (name, value) in &self.headers {
            if name.trim().is_empty() {
                return Err(invalid("header names cannot be empty"));
            }
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(invalid(format!("header name {:?} is not a valid HTTP header name", name)));
            }
            if HeaderValue::from_str(value).is_err() {
                return Err(invalid(format!("value of header {:?} is not a valid HTTP header value", name)));
            }
        }

        Ok(())
    }
}

impl DeliveryConfig {
    pub fn base_delay(&self) -> Duration { Duration::from_millis(self.base_delay_ms) }
    pub fn max_delay(&self) -> Duration { Duration::from_millis(self.max_delay_ms) }
    pub fn rate_limit_floor(&self) -> Duration { Duration::from_millis(self.rate_limit_floor_ms) }
    pub fn jitter(&self) -> Duration { Duration::from_millis(self.jitter_ms) }
    pub fn connect_timeout(&self) -> Duration { Duration::from_secs(self.connect_timeout_secs) }
    pub fn read_timeout(&self) -> Duration { Duration::from_secs(self.read_timeout_secs) }
}

impl CircuitConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl EngineSettings {
    /// Validate delivery, buffer and circuit sections
    pub fn validate(&self) -> Result<()> {
        let delivery = &self.delivery;

        if delivery.batch_size == 0 || delivery.batch_size > 10_000 {
            return Err(invalid("batch_size must be between 1 and 10000"));
        }

        if delivery.max_attempts == 0 || delivery.max_attempts > 10 {
            return Err(invalid("max_attempts must be between 1 and 10"));
        }

        if delivery.base_delay_ms > delivery.max_delay_ms {
            return Err(invalid("base_delay_ms must not exceed max_delay_ms"));
        }

        if delivery.connect_timeout_secs == 0 || delivery.connect_timeout_secs > 600 {
            return Err(invalid("connect_timeout_secs must be between 1 and 600"));
        }

        if delivery.read_timeout_secs == 0 || delivery.read_timeout_secs > 600 {
            return Err(invalid("read_timeout_secs must be between 1 and 600"));
        }

        if delivery.user_agent.trim().is_empty() {
            return Err(invalid("user_agent cannot be empty"));
        }

        if self.buffer.retry_capacity == 0 {
            return Err(invalid("retry_capacity must be greater than 0"));
        }

        if self.circuit.failure_threshold == 0 {
            return Err(invalid("failure_threshold must be greater than 0"));
        }

        if self.circuit.cooldown_secs == 0 {
            return Err(invalid("cooldown_secs must be greater than 0"));
        }

        Ok(())
    }
}
