//! Time-bucketed rolling window of call outcomes
//!
//! The window is a ring of `size` buckets, each covering `interval`. Writes
//! land in the bucket for "now"; buckets whose slice has elapsed since the
//! last write are zeroed before reuse. There is no background ticker: the
//! ring is rolled forward lazily on [`RollingWindow::add`], and
//! [`RollingWindow::aggregate`] skips expired buckets without touching them.
//!
//! Not synchronized. The owning breaker serializes access.

use std::time::{Duration, Instant};

/// Default number of buckets
pub const DEFAULT_BUCKETS: u32 = 40;

/// Default span covered by the whole window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// Observations recorded during one time slice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bucket {
    /// Number of outcomes recorded
    pub count: u64,
    /// Number of those outcomes that were failures
    pub failure_sum: u64,
}

impl Bucket {
    fn reset(&mut self) {
        self.count = 0;
        self.failure_sum = 0;
    }
}

/// Ring of time buckets holding recent outcome counts
#[derive(Debug)]
pub struct RollingWindow {
    buckets: Vec<Bucket>,
    interval: Duration,
    offset: usize,
    /// Start of the bucket at `offset`
    last_time: Instant,
}

impl RollingWindow {
    /// Create a window of `size` buckets, each spanning `interval`.
    ///
    /// `size` is raised to 1 and `interval` to 1ns if given as zero.
    #[must_use]
    pub fn new(size: usize, interval: Duration, now: Instant) -> Self {
        Self {
            buckets: vec![Bucket::default(); size.max(1)],
            interval: interval.max(Duration::from_nanos(1)),
            offset: 0,
            last_time: now,
        }
    }

    /// Create a window covering `window` split into `buckets` slices
    #[must_use]
    pub fn with_span(window: Duration, buckets: u32, now: Instant) -> Self {
        let buckets = buckets.max(1);
        Self::new(buckets as usize, window / buckets, now)
    }

    /// Number of buckets in the ring
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    /// Span of a single bucket
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record one outcome at `now`
    pub fn add(&mut self, is_failure: bool, now: Instant) {
        self.advance(now);
        let bucket = &mut self.buckets[self.offset];
        bucket.count += 1;
        if is_failure {
            bucket.failure_sum += 1;
        }
    }

    /// Sum `(failures, total)` over the buckets still inside the window at `now`
    pub fn aggregate(&self, now: Instant) -> (u64, u64) {
        let size = self.size();
        let span = self.span(now);
        let live = size - span;

        (0..live)
            .map(|i| &self.buckets[(self.offset + span + 1 + i) % size])
            .fold((0, 0), |(failures, total), b| {
                (failures + b.failure_sum, total + b.count)
            })
    }

    /// Number of whole buckets elapsed since `last_time`, capped at the ring size
    fn span(&self, now: Instant) -> usize {
        let elapsed = now.saturating_duration_since(self.last_time);
        let span = elapsed.as_nanos() / self.interval.as_nanos();
        usize::try_from(span).map_or(self.size(), |s| s.min(self.size()))
    }

    fn advance(&mut self, now: Instant) {
        let span = self.span(now);
        if span == 0 {
            return;
        }

        let size = self.size();
        for i in 1..=span {
            self.buckets[(self.offset + i) % size].reset();
        }
        self.offset = (self.offset + span) % size;

        // Align to the start of the current bucket
        let elapsed = now.saturating_duration_since(self.last_time);
        let remainder = elapsed.as_nanos() % self.interval.as_nanos();
        self.last_time = now - Duration::from_nanos(u64::try_from(remainder).unwrap_or(0));
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::with_span(DEFAULT_WINDOW, DEFAULT_BUCKETS, Instant::now())
    }
}
