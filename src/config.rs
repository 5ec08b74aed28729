//! Configuration management for Editgate.
//!
//! All durations are expressed in milliseconds so the same structs can be read
//! from YAML and from `EDITGATE__SECTION__FIELD` environment variables.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{EditGateError, Result};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "EDITGATE";

/// Main configuration for the Editgate service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditGateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-client rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Load shedding configuration
    #[serde(default)]
    pub load_shedding: LoadSheddingConfig,

    /// Downstream edit service
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Per-client fixed window limits and block penalties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Length of the counting window
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests a client may make per window
    #[serde(default = "default_max_requests_per_window")]
    pub max_requests_per_window: u64,

    /// Block applied after exceeding the quota
    #[serde(default = "default_block_duration_ms")]
    pub block_duration_ms: u64,

    /// Requests within `suspicious_window_ms` that count as a burst
    #[serde(default = "default_suspicious_threshold")]
    pub suspicious_threshold: u64,

    /// Window used to derive the minimum gap between requests
    #[serde(default = "default_suspicious_window_ms")]
    pub suspicious_window_ms: u64,

    /// Penalty points added for each request that arrives too fast
    #[serde(default = "default_burst_penalty")]
    pub burst_penalty: u64,

    /// Block applied to suspected brute force
    #[serde(default = "default_brute_force_block_ms")]
    pub brute_force_block_ms: u64,

    /// Tracked client count above which stale entries are swept
    #[serde(default = "default_sweep_threshold")]
    pub sweep_threshold: usize,

    /// Minimum time between two sweeps
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests_per_window: default_max_requests_per_window(),
            block_duration_ms: default_block_duration_ms(),
            suspicious_threshold: default_suspicious_threshold(),
            suspicious_window_ms: default_suspicious_window_ms(),
            burst_penalty: default_burst_penalty(),
            brute_force_block_ms: default_brute_force_block_ms(),
            sweep_threshold: default_sweep_threshold(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl RateLimitingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(self.block_duration_ms)
    }

    pub fn brute_force_block(&self) -> Duration {
        Duration::from_millis(self.brute_force_block_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Requests closer together than this are treated as a burst.
    pub fn burst_gap(&self) -> Duration {
        Duration::from_millis(self.suspicious_window_ms / self.suspicious_threshold.max(1))
    }

    /// Count above which a block is treated as brute force.
    pub fn brute_force_threshold(&self) -> u64 {
        self.max_requests_per_window.saturating_mul(2)
    }
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_requests_per_window() -> u64 {
    10
}

fn default_block_duration_ms() -> u64 {
    5 * 60_000
}

fn default_suspicious_threshold() -> u64 {
    5
}

fn default_suspicious_window_ms() -> u64 {
    10_000
}

fn default_burst_penalty() -> u64 {
    1
}

fn default_brute_force_block_ms() -> u64 {
    15 * 60_000
}

fn default_sweep_threshold() -> usize {
    10_000
}

fn default_sweep_interval_ms() -> u64 {
    10_000
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cooldown before probing a tripped circuit
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Probe requests admitted while half-open
    #[serde(default = "default_half_open_max_requests")]
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            half_open_max_requests: default_half_open_max_requests(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_half_open_max_requests() -> u32 {
    2
}

/// Global load shedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSheddingConfig {
    /// Length of the global counting window
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests per window before shedding starts
    #[serde(default = "default_max_global_requests")]
    pub max_global_requests: u64,

    /// Share of requests rejected while shedding, 0-100
    #[serde(default = "default_shed_percentage")]
    pub shed_percentage: u8,
}

impl Default for LoadSheddingConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_global_requests: default_max_global_requests(),
            shed_percentage: default_shed_percentage(),
        }
    }
}

impl LoadSheddingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Rejection probability in `[0, 1]`.
    pub fn shed_probability(&self) -> f64 {
        f64::from(self.shed_percentage.min(100)) / 100.0
    }
}

fn default_max_global_requests() -> u64 {
    100
}

fn default_shed_percentage() -> u8 {
    50
}

/// Downstream edit service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Endpoint the edit request is forwarded to; unset means unavailable
    #[serde(default)]
    pub url: Option<String>,

    /// Time allowed for one edit
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_upstream_timeout_ms(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_upstream_timeout_ms() -> u64 {
    45_000
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl EditGateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EditGateConfig =
            serde_yaml::from_str(yaml).map_err(|e| EditGateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file layered with
    /// `EDITGATE__SECTION__FIELD` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: EditGateConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a stage meaningless.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if rl.window_ms == 0 {
            return Err(invalid("rate_limiting.window_ms must be greater than zero"));
        }
        if rl.max_requests_per_window == 0 {
            return Err(invalid(
                "rate_limiting.max_requests_per_window must be greater than zero",
            ));
        }
        if rl.block_duration_ms == 0 {
            return Err(invalid("rate_limiting.block_duration_ms must be greater than zero"));
        }
        if rl.suspicious_threshold == 0 {
            return Err(invalid("rate_limiting.suspicious_threshold must be greater than zero"));
        }
        if rl.brute_force_block_ms < rl.block_duration_ms {
            return Err(invalid(
                "rate_limiting.brute_force_block_ms must not be shorter than block_duration_ms",
            ));
        }

        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold must be greater than zero"));
        }
        if cb.half_open_max_requests == 0 {
            return Err(invalid(
                "circuit_breaker.half_open_max_requests must be greater than zero",
            ));
        }

        let ls = &self.load_shedding;
        if ls.window_ms == 0 {
            return Err(invalid("load_shedding.window_ms must be greater than zero"));
        }
        if ls.shed_percentage > 100 {
            return Err(invalid("load_shedding.shed_percentage must be at most 100"));
        }

        if self.upstream.timeout_ms == 0 {
            return Err(invalid("upstream.timeout_ms must be greater than zero"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> EditGateError {
    EditGateError::Config(message.to_string())
}
