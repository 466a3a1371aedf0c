//! Configuration management for the Ayinel rate limiter.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{AyinelError, Result};
use crate::ratelimit::{validate_policies, NamedPolicy, DEFAULT_SWEEP_INTERVAL, PRESET_NAMES};

/// Prefix for environment overrides, e.g. `AYINEL__SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "AYINEL";

/// Main configuration for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AyinelConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Public HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Admin listen address for stats, key resets and policy updates
    #[serde(default = "default_admin_addr")]
    pub admin_addr: SocketAddr,

    /// Key clients by `X-Forwarded-For`/`X-Real-IP`. Enable only behind a
    /// proxy that overwrites them, otherwise clients can pick their own key.
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            admin_addr: default_admin_addr(),
            trust_proxy_headers: false,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Seconds between sweeps of expired entries
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Built-in policies by name, see [`PRESET_NAMES`]
    #[serde(default)]
    pub presets: Vec<String>,

    /// Custom policies, counted after the presets
    #[serde(default)]
    pub policies: Vec<NamedPolicy>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            presets: Vec::new(),
            policies: Vec::new(),
        }
    }
}

impl RateLimitingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Presets followed by custom policies. With neither configured the
    /// `global` preset applies.
    pub fn resolved_policies(&self) -> Result<Vec<NamedPolicy>> {
        let mut resolved = Vec::with_capacity(self.presets.len() + self.policies.len());

        for name in &self.presets {
            let preset = NamedPolicy::preset(name).ok_or_else(|| {
                AyinelError::Config(format!(
                    "unknown preset '{}', expected one of: {}",
                    name,
                    PRESET_NAMES.join(", ")
                ))
            })?;
            resolved.push(preset);
        }
        resolved.extend(self.policies.iter().cloned());

        if resolved.is_empty() {
            resolved.push(NamedPolicy::default());
        }

        validate_policies(&resolved)?;
        Ok(resolved)
    }
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

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

impl AyinelConfig {
    /// Load configuration from an optional YAML file plus `AYINEL__*` environment variables.
    ///
    /// Environment values take precedence over the file, which takes precedence
    /// over the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: AyinelConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AyinelConfig = serde_yaml::from_str(yaml)
            .map_err(|e| AyinelError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.sweep_interval_secs == 0 {
            return Err(AyinelError::Config(
                "rate_limiting.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.server.http_addr == self.server.admin_addr && self.server.http_addr.port() != 0 {
            return Err(AyinelError::Config(format!(
                "server.admin_addr must differ from server.http_addr ({})",
                self.server.http_addr
            )));
        }

        self.rate_limiting.resolved_policies()?;
        Ok(())
    }
}
