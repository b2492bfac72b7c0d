//! Configuration management for callguard.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GuardError, Result};
use crate::ratelimit::LimiterConfig;
use crate::retry::RetryPolicy;

/// Prefix for environment variable overrides, e.g.
/// `CALLGUARD_RETRY__RETRY_DELAY_MS=250`.
pub const ENV_PREFIX: &str = "CALLGUARD";

/// Main configuration for callguard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Admission control configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Admission control configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests admitted per key within one window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in milliseconds
    #[serde(default = "default_window_duration_ms")]
    pub window_duration_ms: u64,

    /// How often to drop keys with no live requests, in milliseconds.
    /// Zero disables the sweeper.
    #[serde(default)]
    pub cleanup_interval_ms: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_duration_ms: default_window_duration_ms(),
            cleanup_interval_ms: 0,
        }
    }
}

fn default_max_requests() -> u32 {
    5
}

fn default_window_duration_ms() -> u64 {
    60_000
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per call, including the first
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl GuardConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GuardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load layered configuration: defaults, then the optional file, then
    /// `CALLGUARD_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let config: GuardConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot be built from.
    pub fn validate(&self) -> Result<()> {
        self.limiter_config()?;
        self.retry_policy()?;
        Ok(())
    }

    /// The limiter settings as a validated value object.
    pub fn limiter_config(&self) -> Result<LimiterConfig> {
        LimiterConfig::new(
            self.rate_limiting.max_requests,
            Duration::from_millis(self.rate_limiting.window_duration_ms),
        )
    }

    /// The retry settings as a validated value object.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(
            self.retry.max_retry_attempts,
            Duration::from_millis(self.retry.retry_delay_ms),
        )
    }

    /// Interval for the idle-key sweeper, if enabled.
    pub fn cleanup_interval(&self) -> Option<Duration> {
        match self.rate_limiting.cleanup_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
