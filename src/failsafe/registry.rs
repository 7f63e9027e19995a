//! Named breaker registry
//!
//! One breaker per protected dependency, created on first use from the
//! configured defaults or a per-name override. The registry replaces
//! process-global breaker maps with an object that has an explicit lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::{debug, info};

use super::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use super::clock::{Clock, SystemClock};
use crate::config::BreakersConfig;
use crate::error::{CallError, Error, Result};

/// Registry of circuit breakers keyed by dependency name
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakersConfig,
    clock: Arc<dyn Clock>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    shut_down: AtomicBool,
}

impl BreakerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(config: &BreakersConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty registry whose breakers read time from `clock`
    #[must_use]
    pub fn with_clock(config: &BreakersConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: config.clone(),
            clock,
            breakers: DashMap::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Breaker for `name`, creating it on first use
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shutdown`] once [`shutdown`](Self::shutdown) has run.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<CircuitBreaker>> {
        if self.is_shut_down() {
            return Err(Error::Shutdown);
        }

        if let Some(existing) = self.breakers.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let breaker = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::with_clock(
                    name,
                    self.config.for_name(name),
                    Arc::clone(&self.clock),
                ))
            })
            .value()
            .clone();

        // A shutdown that raced the insert must not leave it behind
        if self.is_shut_down() {
            self.breakers.remove(name);
            return Err(Error::Shutdown);
        }
        Ok(breaker)
    }

    /// Existing breaker for `name`
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Discard the breaker for `name`; the next lookup starts fresh
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, b)| b)
    }

    /// Registered breaker names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Snapshots of every registered breaker, sorted by name
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|e| e.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker has been created
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Run `f` under the breaker for `name`
    pub fn call<T, E, F>(&self, name: &str, f: F) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.get_or_create(name)?.call(f)
    }

    /// Drop every breaker and refuse further creation.
    ///
    /// Breakers already handed out keep working for their holders.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let count = self.breakers.len();
        self.breakers.clear();
        info!(breakers = count, "Breaker registry shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(&BreakersConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;

    #[test]
    fn test_get_or_create_reuses_breaker() {
        let registry = BreakerRegistry::default();
        assert!(registry.is_empty());

        let a = registry.get_or_create("user-rpc").unwrap();
        let b = registry.get_or_create("user-rpc").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_does_not_create() {
        let registry = BreakerRegistry::default();
        assert!(registry.get("chat-rpc").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_override_applies_by_name() {
        let mut config = BreakersConfig::default();
        config.overrides.insert(
            "activity-rpc".to_string(),
            CircuitBreakerConfig {
                requests: 1,
                ..Default::default()
            },
        );
        let registry = BreakerRegistry::new(&config);

        registry
            .get_or_create("activity-rpc")
            .unwrap()
            .allow()
            .unwrap()
            .reject("down");
        registry
            .get_or_create("user-rpc")
            .unwrap()
            .allow()
            .unwrap()
            .reject("down");

        assert!(registry.get("activity-rpc").unwrap().is_open());
        assert!(!registry.get("user-rpc").unwrap().is_open());
    }

    #[test]
    fn test_remove_and_names() {
        let registry = BreakerRegistry::default();
        registry.get_or_create("b").unwrap();
        registry.get_or_create("a").unwrap();
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.names(), vec!["b".to_string()]);
    }

    #[test]
    fn test_shutdown_refuses_new_breakers() {
        let registry = BreakerRegistry::default();
        let held = registry.get_or_create("user-rpc").unwrap();

        registry.shutdown();
        registry.shutdown();

        assert!(registry.is_shut_down());
        assert!(registry.is_empty());
        assert_eq!(registry.get_or_create("user-rpc").unwrap_err(), Error::Shutdown);

        let err = registry.call("user-rpc", || Ok::<_, String>(())).unwrap_err();
        assert!(matches!(err, CallError::Breaker(Error::Shutdown)));

        // Handed-out breakers keep working
        assert!(held.allow().is_ok());
    }

    #[test]
    fn test_shutdown_racing_creation_leaves_nothing_behind() {
        for _ in 0..50 {
            let registry = BreakerRegistry::default();
            std::thread::scope(|s| {
                for worker in 0..4 {
                    let registry = &registry;
                    s.spawn(move || {
                        for i in 0..100 {
                            let _ = registry.get_or_create(&format!("rpc-{worker}-{i}"));
                        }
                    });
                }
                s.spawn(|| registry.shutdown());
            });

            assert!(registry.is_shut_down());
            assert!(registry.is_empty(), "left behind: {:?}", registry.names());
        }
    }
}
