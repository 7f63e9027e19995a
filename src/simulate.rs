//! Traffic simulator
//!
//! Drives one breaker with concurrent tokio workers calling a flaky
//! dependency, so thresholds can be tried out before they are rolled out to
//! the RPC clients. A reporter task logs breaker state on a fixed period.
//! Every task stops when the run context is canceled or its deadline passes,
//! and all of them are joined before the report is built.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context as _, bail};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, sleep};
use tracing::{debug, info, warn};

use crate::cli::SimulateArgs;
use crate::error::{CallError, Error};
use crate::failsafe::{BreakerSnapshot, CircuitBreaker, CircuitState, Context};

/// Error returned by the simulated dependency
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("simulated dependency failure")]
pub struct DependencyError;

/// Dependency that fails a fixed fraction of calls until it recovers
#[derive(Debug)]
pub struct FlakyDependency {
    failure_ratio: f64,
    started: Instant,
    recover_after: Option<Duration>,
}

impl FlakyDependency {
    /// Create a dependency failing `failure_ratio` of calls
    #[must_use]
    pub fn new(failure_ratio: f64, recover_after: Option<Duration>) -> Self {
        Self {
            failure_ratio: failure_ratio.clamp(0.0, 1.0),
            started: Instant::now(),
            recover_after,
        }
    }

    /// Whether the recovery point has passed
    pub fn is_recovered(&self) -> bool {
        self.recover_after
            .is_some_and(|after| self.started.elapsed() >= after)
    }

    /// Perform one call
    pub fn invoke(&self) -> Result<(), DependencyError> {
        if !self.is_recovered() && fastrand::f64() < self.failure_ratio {
            return Err(DependencyError);
        }
        Ok(())
    }
}

/// Simulation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSettings {
    /// Concurrent callers
    pub workers: usize,
    /// Fraction of failing dependency calls
    pub failure_ratio: f64,
    /// When the dependency recovers
    pub recover_after: Option<Duration>,
    /// Total run time
    pub duration: Duration,
    /// Pause between calls of one worker
    pub interval: Duration,
    /// Status report period
    pub report_every: Duration,
}

impl SimulationSettings {
    /// Reject settings the simulator cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.failure_ratio) {
            bail!("failure ratio must be in [0, 1], got {}", self.failure_ratio);
        }
        if self.report_every.is_zero() {
            bail!("report period must be non-zero");
        }
        Ok(())
    }
}

impl From<&SimulateArgs> for SimulationSettings {
    fn from(args: &SimulateArgs) -> Self {
        Self {
            workers: args.workers,
            failure_ratio: args.failure_ratio,
            recover_after: args.recover_after,
            duration: args.duration,
            interval: args.interval,
            report_every: args.report_every,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    open_samples: AtomicU64,
}

/// Outcome of a simulation run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    /// Calls that reached the dependency and succeeded
    pub succeeded: u64,
    /// Calls that reached the dependency and failed
    pub failed: u64,
    /// Calls refused by the open breaker
    pub rejected: u64,
    /// Status reports that found the breaker open
    pub open_samples: u64,
    /// Wall time of the run
    pub elapsed_ms: u64,
    /// Breaker state at the end of the run
    pub breaker: BreakerSnapshot,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulation of '{}' ({} ms)", self.breaker.name, self.elapsed_ms)?;
        writeln!(f, "  succeeded:    {}", self.succeeded)?;
        writeln!(f, "  failed:       {}", self.failed)?;
        writeln!(f, "  rejected:     {}", self.rejected)?;
        writeln!(f, "  open samples: {}", self.open_samples)?;
        write!(
            f,
            "  final state:  {:?} ({} failures in {} calls)",
            self.breaker.state, self.breaker.failures, self.breaker.total
        )
    }
}

/// Run the simulation until `ctx` is done or `settings.duration` elapses
pub async fn run_simulation(
    breaker: Arc<CircuitBreaker>,
    settings: &SimulationSettings,
    ctx: &Context,
) -> anyhow::Result<SimulationReport> {
    settings.validate().context("invalid simulation settings")?;

    let started = Instant::now();
    let run_ctx = ctx.with_timeout(settings.duration);
    let dependency = Arc::new(FlakyDependency::new(
        settings.failure_ratio,
        settings.recover_after,
    ));
    let counters = Arc::new(Counters::default());

    info!(
        breaker = breaker.name(),
        workers = settings.workers,
        failure_ratio = settings.failure_ratio,
        duration_ms = settings.duration.as_millis() as u64,
        "Starting simulation"
    );

    let mut tasks = JoinSet::new();
    for worker in 0..settings.workers {
        tasks.spawn(worker_loop(
            worker,
            Arc::clone(&breaker),
            Arc::clone(&dependency),
            Arc::clone(&counters),
            run_ctx.clone(),
            settings.interval,
        ));
    }
    tasks.spawn(report_loop(
        Arc::clone(&breaker),
        Arc::clone(&counters),
        run_ctx.clone(),
        settings.report_every,
    ));

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Simulation task failed");
        }
    }

    Ok(SimulationReport {
        succeeded: counters.succeeded.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
        rejected: counters.rejected.load(Ordering::Relaxed),
        open_samples: counters.open_samples.load(Ordering::Relaxed),
        elapsed_ms: started.elapsed().as_millis() as u64,
        breaker: breaker.snapshot(),
    })
}

async fn worker_loop(
    worker: usize,
    breaker: Arc<CircuitBreaker>,
    dependency: Arc<FlakyDependency>,
    counters: Arc<Counters>,
    ctx: Context,
    interval: Duration,
) {
    loop {
        match breaker.call_ctx(&ctx, || dependency.invoke()) {
            Ok(()) => {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(CallError::Inner(_)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(CallError::Breaker(Error::ServiceUnavailable)) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(CallError::Breaker(e)) => {
                debug!(worker, reason = %e, "Worker stopping");
                return;
            }
        }

        tokio::select! {
            () = ctx.token().cancelled() => return,
            () = sleep(interval) => {}
        }
    }
}

async fn report_loop(
    breaker: Arc<CircuitBreaker>,
    counters: Arc<Counters>,
    ctx: Context,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = ctx.token().cancelled() => return,
            _ = ticker.tick() => {}
        }
        if ctx.is_done() {
            return;
        }

        let snapshot = breaker.snapshot();
        if snapshot.state == CircuitState::Open {
            counters.open_samples.fetch_add(1, Ordering::Relaxed);
        }
        info!(
            breaker = %snapshot.name,
            state = ?snapshot.state,
            failures = snapshot.failures,
            total = snapshot.total,
            error_rate = snapshot.error_rate,
            "Breaker status"
        );
    }
}
