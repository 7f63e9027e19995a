//! Error types for the circuit breaker

use thiserror::Error;

use crate::failsafe::ContextError;

/// Result type alias for breaker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the breaker itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Admission refused because the circuit is open
    #[error("Service unavailable: circuit breaker is open")]
    ServiceUnavailable,

    /// Context was already done when the call was attempted
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Registry shutdown
    #[error("Breaker registry shut down")]
    Shutdown,
}

/// Error returned by the `call*` family of a [`CircuitBreaker`](crate::failsafe::CircuitBreaker).
///
/// Breaker-side refusals are kept apart from the caller's own error so the
/// latter can be passed through untouched.
#[derive(Error, Debug)]
pub enum CallError<E> {
    /// The breaker refused the call (open circuit or done context)
    #[error(transparent)]
    Breaker(#[from] Error),

    /// The guarded function returned an error
    #[error("{0}")]
    Inner(E),
}

impl<E> CallError<E> {
    /// Whether the call was refused because the circuit is open
    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, Self::Breaker(Error::ServiceUnavailable))
    }

    /// The caller's error, if the guarded function produced one
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Breaker(_) => None,
        }
    }
}
