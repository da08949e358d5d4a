//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::Policy;

/// Prefix for environment overrides, e.g. `TURNSTILE__LIMITER__WINDOW_SECS`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Admission policy configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Background eviction configuration
    #[serde(default)]
    pub janitor: JanitorSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Admission policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Trailing window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Admissions allowed per client within one window
    #[serde(default = "default_max_requests")]
    pub max_requests_per_window: u32,

    /// Drop a client's out-of-window timestamps while deciding for it
    #[serde(default = "default_prune_on_admit")]
    pub prune_on_admit: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests_per_window: default_max_requests(),
            prune_on_admit: default_prune_on_admit(),
        }
    }
}

impl LimiterConfig {
    /// Build the policy described by this configuration.
    pub fn policy(&self) -> Result<Policy> {
        Policy::from_std(
            Duration::from_secs(self.window_secs),
            self.max_requests_per_window,
        )
    }
}

fn default_window_secs() -> u64 {
    600
}

fn default_max_requests() -> u32 {
    5
}

fn default_prune_on_admit() -> bool {
    true
}

/// Background eviction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanitorSettings {
    /// Whether the eviction task runs at all
    #[serde(default = "default_janitor_enabled")]
    pub enabled: bool,

    /// Seconds between eviction passes
    #[serde(default = "default_janitor_interval")]
    pub interval_secs: u64,

    /// Seconds since a client's last admission before it is forgotten
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
}

impl Default for JanitorSettings {
    fn default() -> Self {
        Self {
            enabled: default_janitor_enabled(),
            interval_secs: default_janitor_interval(),
            idle_ttl_secs: default_idle_ttl(),
        }
    }
}

fn default_janitor_enabled() -> bool {
    true
}

fn default_janitor_interval() -> u64 {
    60
}

fn default_idle_ttl() -> u64 {
    1200
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional YAML file layered under
    /// `TURNSTILE__`-prefixed environment variables.
    ///
    /// Emits no log events; callers log the outcome once tracing is up.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: TurnstileConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration describes a usable limiter.
    pub fn validate(&self) -> Result<()> {
        self.limiter.policy()?;

        if self.janitor.enabled && self.janitor.interval_secs == 0 {
            return Err(TurnstileError::Config(
                "janitor.interval_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
