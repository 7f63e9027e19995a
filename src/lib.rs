//! Campus Breaker
//!
//! Adaptive circuit breaker guarding the RPC dependencies of the campus
//! activity services (user, chat, activity, gateway).
//!
//! # Features
//!
//! - **Rolling error window**: time-bucketed outcome counts over a trailing span
//! - **Circuit breaker**: trips on error rate once enough volume is seen,
//!   recovers lazily when the open period elapses
//! - **Guarded calls**: `call`, custom acceptability, fallbacks, and
//!   context-checked variants
//! - **Registry**: named breakers with per-dependency overrides
//!
//! # Example
//!
//! ```
//! use campus_breaker::config::CircuitBreakerConfig;
//! use campus_breaker::failsafe::CircuitBreaker;
//!
//! let breaker = CircuitBreaker::new("user-rpc", &CircuitBreakerConfig::default());
//! let profile = breaker.call(|| Ok::<_, std::io::Error>("alice"));
//! assert_eq!(profile.unwrap(), "alice");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod failsafe;
pub mod simulate;

pub use error::{CallError, Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("tracing: {e}"))),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Config(format!("tracing: {e}"))),
    }
}
