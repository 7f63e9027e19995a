//! Failsafe mechanisms: rolling error window, circuit breaker, registry

mod circuit_breaker;
mod clock;
mod context;
mod registry;
mod rolling_window;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState, Promise};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{Context, ContextError};
pub use registry::BreakerRegistry;
pub use rolling_window::{Bucket, DEFAULT_BUCKETS, DEFAULT_WINDOW, RollingWindow};
