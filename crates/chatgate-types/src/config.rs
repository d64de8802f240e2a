//! Service configuration types for Chatgate.
//!
//! `ServiceConfig` represents the top-level `config.toml`. Every field has a
//! default, so an empty file (or no file at all) yields a runnable service.
//! Values are fixed at process start; nothing here is mutable at runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration for the Chatgate service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listener and request lifecycle settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-client admission control.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        self.rate_limit.validate()
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on a single request, enforced by the HTTP layer.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long shutdown waits for in-flight requests to drain.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// `host:port` string suitable for binding a listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Per-client token-bucket settings.
///
/// Every client key gets its own bucket holding up to `burst` tokens and
/// refilling continuously at `requests_per_second`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// When false the admission layer is not installed at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Sustained rate: tokens added per second. Fractional values are allowed.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Burst capacity: the most requests a fresh client may make at once.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// A client unseen for this long has its bucket reclaimed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Seconds between background sweeps. `0` disables the sweeper.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How the client key is derived from a request.
    #[serde(default)]
    pub client_key: ClientKeySource,
}

impl RateLimitConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Sweep period, or `None` when periodic sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.burst == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.burst must be at least 1".to_string(),
            ));
        }
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.requests_per_second must be a positive number, got {}",
                self.requests_per_second
            )));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.idle_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_requests_per_second() -> f64 {
    5.0
}

fn default_burst() -> u32 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            client_key: ClientKeySource::default(),
        }
    }
}

/// Where the client key comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKeySource {
    /// The TCP peer address of the connection.
    #[default]
    Peer,
    /// The first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer address.
    ///
    /// These headers are client-controlled; only use this behind a proxy
    /// that overwrites them.
    Forwarded,
}

/// Log output settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// Bridge spans to OpenTelemetry with a stdout exporter.
    #[serde(default)]
    pub otel: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
