//! Configuration management

use std::{
    collections::HashMap,
    path::Path,
    time::{Duration, Instant},
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "CAMPUS_BREAKER_";

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Circuit breaker configuration
    pub breakers: BreakersConfig,
}

/// Breaker defaults and per-dependency overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakersConfig {
    /// Settings for breakers without an override
    pub defaults: CircuitBreakerConfig,
    /// Per-name settings, replacing the defaults entirely
    pub overrides: HashMap<String, CircuitBreakerConfig>,
}

impl BreakersConfig {
    /// Settings for the breaker called `name`
    pub fn for_name(&self, name: &str) -> &CircuitBreakerConfig {
        self.overrides.get(name).unwrap_or(&self.defaults)
    }

    /// Validate defaults and every override
    pub fn validate(&self) -> Result<()> {
        self.defaults
            .validate()
            .map_err(|e| Error::Config(format!("breakers.defaults: {e}")))?;
        for (name, cfg) in &self.overrides {
            cfg.validate()
                .map_err(|e| Error::Config(format!("breakers.overrides.{name}: {e}")))?;
        }
        Ok(())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaker
    pub enabled: bool,
    /// Minimum outcomes inside the window before the error rate is evaluated
    pub requests: u64,
    /// Failure fraction at which the breaker trips, in (0, 1]
    pub error_rate: f64,
    /// How long the breaker stays open once tripped
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Trailing span the error rate is computed over
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Number of buckets the window is split into
    pub buckets: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: 100,
            error_rate: 0.5,
            timeout: Duration::from_secs(60),
            window: Duration::from_secs(10),
            buckets: 40,
        }
    }
}

impl CircuitBreakerConfig {
    /// Check the values are usable as-is
    pub fn validate(&self) -> Result<()> {
        if !(self.error_rate > 0.0 && self.error_rate <= 1.0) {
            return Err(Error::Config(format!(
                "error_rate must be in (0, 1], got {}",
                self.error_rate
            )));
        }
        if self.buckets == 0 {
            return Err(Error::Config("buckets must be at least 1".to_string()));
        }
        if self.window.is_zero() {
            return Err(Error::Config("window must be non-zero".to_string()));
        }
        if (self.window / self.buckets).is_zero() {
            return Err(Error::Config(format!(
                "window {:?} is too short for {} buckets",
                self.window, self.buckets
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be non-zero".to_string()));
        }
        if Instant::now().checked_add(self.timeout).is_none() {
            return Err(Error::Config(format!(
                "timeout {} is too large",
                humantime::format_duration(self.timeout)
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or holds invalid breaker settings.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // CAMPUS_BREAKER_BREAKERS__DEFAULTS__REQUESTS=50
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.breakers.validate()?;
        tracing::debug!(
            overrides = config.breakers.overrides.len(),
            "Configuration loaded"
        );

        Ok(config)
    }
}
