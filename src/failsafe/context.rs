//! Cancellation and deadline context for `*_ctx` breaker calls
//!
//! The breaker only ever inspects a context synchronously before admitting a
//! call. It never waits on it and never propagates it into the guarded
//! function.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a context is done
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// Explicitly canceled
    #[error("context canceled")]
    Canceled,
    /// Deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token plus optional deadline
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never done unless canceled
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context canceled together with this one
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child that also expires after `timeout`.
    ///
    /// A timeout too large to represent adds no deadline.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// Derive a child that also expires at `deadline`.
    ///
    /// The earlier of the parent's and the new deadline wins.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = self.deadline.map_or(deadline, |d| d.min(deadline));
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this context and every child derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Underlying token, for `select!`-style waiting outside the breaker
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Why the context is done, or `None` if it is still live.
    ///
    /// Cancellation is reported before deadline expiry.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Whether the context is canceled or past its deadline
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }
}

impl From<CancellationToken> for Context {
    fn from(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_live() {
        let ctx = Context::background();
        assert_eq!(ctx.err(), None);
        assert!(!ctx.is_done());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.child();
        let grandchild = child.with_timeout(Duration::from_secs(60));

        parent.cancel();

        assert_eq!(child.err(), Some(ContextError::Canceled));
        assert_eq!(grandchild.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn test_child_cancel_leaves_parent_live() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();

        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[test]
    fn test_deadline_exceeded() {
        let past = Instant::now().checked_sub(Duration::from_millis(1)).unwrap();
        let ctx = Context::background().with_deadline(past);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[test]
    fn test_unrepresentable_timeout_has_no_deadline() {
        let ctx = Context::background().with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);
        assert!(!ctx.is_done());

        let bounded = Context::background().with_timeout(Duration::from_secs(5));
        assert_eq!(bounded.with_timeout(Duration::MAX).deadline(), bounded.deadline());
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let parent = Context::background().with_deadline(now + Duration::from_secs(1));
        let child = parent.with_deadline(now + Duration::from_secs(30));
        assert_eq!(child.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_cancellation_reported_before_deadline() {
        let past = Instant::now().checked_sub(Duration::from_millis(1)).unwrap();
        let ctx = Context::background().with_deadline(past);
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn test_from_token() {
        let token = CancellationToken::new();
        let ctx = Context::from(token.clone());
        token.cancel();
        assert!(ctx.is_done());
    }
}
