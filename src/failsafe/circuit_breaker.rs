//! Circuit breaker implementation
//!
//! Outcomes feed a [`RollingWindow`]. Once the window holds at least
//! `requests` outcomes and the failure fraction reaches `error_rate`, the
//! breaker opens for `timeout`. When that instant passes, the next admission
//! check closes it again and admits traffic unconditionally; there is no
//! half-open probe.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::context::Context;
use super::rolling_window::RollingWindow;
use crate::config::CircuitBreakerConfig;
use crate::error::{CallError, Error, Result};

/// Open period used when the configured timeout overflows the clock
const MAX_OPEN: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Circuit is closed (allowing requests)
    Closed,
    /// Circuit is open (blocking requests)
    Open,
}

/// Mutable state, guarded by a single lock so the trip decision always sees
/// the aggregate it was computed from
#[derive(Debug)]
struct BreakerState {
    window: RollingWindow,
    open_until: Option<Instant>,
}

/// Circuit breaker for dependency protection
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Dependency name
    name: String,
    enabled: bool,
    request_threshold: u64,
    error_rate_threshold: f64,
    open_duration: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(name: &str, config: &CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a circuit breaker reading time from `clock`.
    ///
    /// Out-of-range settings are clamped: `error_rate` into (0, 1], and the
    /// window to at least one bucket of at least 1ns.
    #[must_use]
    pub fn with_clock(name: &str, config: &CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let window = RollingWindow::with_span(config.window, config.buckets, clock.now());
        Self {
            name: name.to_string(),
            enabled: config.enabled,
            request_threshold: config.requests,
            error_rate_threshold: clamp_error_rate(config.error_rate),
            open_duration: config.timeout,
            clock,
            state: Mutex::new(BreakerState {
                window,
                open_until: None,
            }),
        }
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the breaker is enforcing anything
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Admission check. Closes an open breaker whose timeout has elapsed.
    pub fn is_open(&self) -> bool {
        if !self.enabled {
            return false;
        }

        let now = self.clock.now();
        let mut state = self.state.lock();
        let open_until = state.open_until;
        match open_until {
            Some(until) if now >= until => {
                state.open_until = None;
                info!(breaker = %self.name, "Circuit breaker closed");
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Ask for permission to run guarded work
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] while the circuit is open.
    #[tracing::instrument(level = "trace", skip(self), fields(breaker = %self.name))]
    pub fn allow(&self) -> Result<Promise<'_>> {
        if self.is_open() {
            tracing::trace!("Circuit open, rejecting request");
            telemetry_metrics::counter!("breaker_rejections_total", "breaker" => self.name.clone())
                .increment(1);
            return Err(Error::ServiceUnavailable);
        }
        tracing::trace!("Circuit closed, allowing request");
        Ok(Promise { breaker: self })
    }

    /// [`allow`](Self::allow), refusing first if `ctx` is already done
    pub fn allow_ctx(&self, ctx: &Context) -> Result<Promise<'_>> {
        if let Some(e) = ctx.err() {
            return Err(e.into());
        }
        self.allow()
    }

    /// Run `f` under the breaker. Any `Err` counts as a failure.
    pub fn call<T, E, F>(&self, f: F) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.call_with_acceptable(f, default_acceptable)
    }

    /// Run `f` under the breaker, classifying its outcome with `acceptable`.
    ///
    /// `acceptable` receives `None` when `f` succeeded. A panic in `f` is
    /// recorded as a failure and then resumed.
    pub fn call_with_acceptable<T, E, F, A>(
        &self,
        f: F,
        acceptable: A,
    ) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        A: FnOnce(Option<&E>) -> bool,
    {
        let no_fallback: Option<fn(Error) -> std::result::Result<T, CallError<E>>> = None;
        self.execute(f, no_fallback, acceptable)
    }

    /// Run `f` under the breaker; while open, return `fallback`'s result instead
    pub fn call_with_fallback<T, E, F, B>(
        &self,
        f: F,
        fallback: B,
    ) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        B: FnOnce(Error) -> std::result::Result<T, CallError<E>>,
    {
        self.execute(f, Some(fallback), default_acceptable)
    }

    /// Fallback and custom acceptability combined
    pub fn call_with_fallback_acceptable<T, E, F, B, A>(
        &self,
        f: F,
        fallback: B,
        acceptable: A,
    ) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        B: FnOnce(Error) -> std::result::Result<T, CallError<E>>,
        A: FnOnce(Option<&E>) -> bool,
    {
        self.execute(f, Some(fallback), acceptable)
    }

    /// [`call`](Self::call), refusing first if `ctx` is already done
    pub fn call_ctx<T, E, F>(&self, ctx: &Context, f: F) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        check_ctx(ctx)?;
        self.call(f)
    }

    /// [`call_with_acceptable`](Self::call_with_acceptable) with a context check
    pub fn call_with_acceptable_ctx<T, E, F, A>(
        &self,
        ctx: &Context,
        f: F,
        acceptable: A,
    ) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        A: FnOnce(Option<&E>) -> bool,
    {
        check_ctx(ctx)?;
        self.call_with_acceptable(f, acceptable)
    }

    /// [`call_with_fallback`](Self::call_with_fallback) with a context check.
    ///
    /// A done context is returned as-is; the fallback is not consulted.
    pub fn call_with_fallback_ctx<T, E, F, B>(
        &self,
        ctx: &Context,
        f: F,
        fallback: B,
    ) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        B: FnOnce(Error) -> std::result::Result<T, CallError<E>>,
    {
        check_ctx(ctx)?;
        self.call_with_fallback(f, fallback)
    }

    /// [`call_with_fallback_acceptable`](Self::call_with_fallback_acceptable) with a context check
    pub fn call_with_fallback_acceptable_ctx<T, E, F, B, A>(
        &self,
        ctx: &Context,
        f: F,
        fallback: B,
        acceptable: A,
    ) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        B: FnOnce(Error) -> std::result::Result<T, CallError<E>>,
        A: FnOnce(Option<&E>) -> bool,
    {
        check_ctx(ctx)?;
        self.call_with_fallback_acceptable(f, fallback, acceptable)
    }

    fn execute<T, E, F, B, A>(
        &self,
        f: F,
        fallback: Option<B>,
        acceptable: A,
    ) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        B: FnOnce(Error) -> std::result::Result<T, CallError<E>>,
        A: FnOnce(Option<&E>) -> bool,
    {
        let promise = match self.allow() {
            Ok(promise) => promise,
            Err(err) => {
                return match fallback {
                    Some(fallback) => fallback(err),
                    None => Err(CallError::Breaker(err)),
                };
            }
        };

        let result = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => {
                promise.reject("panic");
                panic::resume_unwind(payload);
            }
        };

        if acceptable(result.as_ref().err()) {
            promise.accept();
        } else {
            promise.reject("call failed");
        }

        result.map_err(CallError::Inner)
    }

    /// Record an outcome and trip the breaker if the window warrants it
    fn record(&self, is_failure: bool) {
        if !self.enabled {
            return;
        }

        let now = self.clock.now();
        let mut state = self.state.lock();
        state.window.add(is_failure, now);

        let (failures, total) = state.window.aggregate(now);
        if total == 0 || total < self.request_threshold {
            return;
        }
        if (failures as f64 / total as f64) < self.error_rate_threshold {
            return;
        }

        let was_open = state.open_until.is_some_and(|until| now < until);
        state.open_until = Some(open_deadline(now, self.open_duration));
        if !was_open {
            warn!(
                breaker = %self.name,
                failures,
                total,
                timeout_ms = self.open_duration.as_millis() as u64,
                "Circuit breaker opened"
            );
            telemetry_metrics::counter!("breaker_trips_total", "breaker" => self.name.clone())
                .increment(1);
        }
    }

    /// Current state, without closing an elapsed breaker
    pub fn state(&self) -> CircuitState {
        self.snapshot().state
    }

    /// Point-in-time view of the breaker
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let state = self.state.lock();
        let (failures, total) = state.window.aggregate(now);
        let remaining = state
            .open_until
            .filter(|_| self.enabled)
            .and_then(|until| until.checked_duration_since(now))
            .filter(|d| !d.is_zero());

        BreakerSnapshot {
            name: self.name.clone(),
            state: if remaining.is_some() {
                CircuitState::Open
            } else {
                CircuitState::Closed
            },
            failures,
            total,
            error_rate: if total == 0 {
                0.0
            } else {
                failures as f64 / total as f64
            },
            open_remaining_ms: remaining.map(|d| d.as_millis() as u64),
        }
    }

    /// Human-readable status line
    pub fn status_message(&self) -> String {
        let snapshot = self.snapshot();
        match snapshot.open_remaining_ms {
            Some(ms) => format!(
                "Breaker '{}': circuit breaker is open after {} failures in {} calls, retry in {} seconds",
                self.name,
                snapshot.failures,
                snapshot.total,
                ms.div_ceil(1000)
            ),
            None => format!(
                "Breaker '{}' is closed ({} failures in {} calls)",
                self.name, snapshot.failures, snapshot.total
            ),
        }
    }
}

/// Outcome handle returned by [`CircuitBreaker::allow`].
///
/// Resolve it with [`accept`](Self::accept) or [`reject`](Self::reject) once
/// the guarded work has finished.
#[must_use = "resolve the promise with accept() or reject()"]
#[derive(Debug)]
pub struct Promise<'a> {
    breaker: &'a CircuitBreaker,
}

impl Promise<'_> {
    /// Report success
    pub fn accept(self) {
        self.breaker.record(false);
    }

    /// Report failure. `reason` is only logged.
    pub fn reject(self, reason: &str) {
        debug!(breaker = %self.breaker.name, reason, "Call rejected");
        self.breaker.record(true);
    }
}

/// Breaker state snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Failures inside the window
    pub failures: u64,
    /// Outcomes inside the window
    pub total: u64,
    /// `failures / total`, or 0 when the window is empty
    pub error_rate: f64,
    /// Time left before the breaker closes, when open
    pub open_remaining_ms: Option<u64>,
}

fn default_acceptable<E>(err: Option<&E>) -> bool {
    err.is_none()
}

fn check_ctx<E>(ctx: &Context) -> std::result::Result<(), CallError<E>> {
    match ctx.err() {
        Some(e) => Err(CallError::Breaker(e.into())),
        None => Ok(()),
    }
}

/// `now + timeout`, saturating to [`MAX_OPEN`] past `now` on overflow
fn open_deadline(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(MAX_OPEN))
        .unwrap_or(now)
}

fn clamp_error_rate(rate: f64) -> f64 {
    if rate > 0.0 {
        rate.min(1.0)
    } else {
        f64::MIN_POSITIVE
    }
}
