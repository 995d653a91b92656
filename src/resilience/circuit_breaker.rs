//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, calls pass through and are observed
//! - Open: service assumed down, calls fail fast
//! - Half-Open: trial calls pass through to test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= max_failures
//! Open → Half-Open: first call attempted after the cooldown (no timer task)
//! Half-Open → Closed: consecutive successes >= half_open_success
//! Half-Open → Open: any failure
//! ```
//! Counters reset on every transition.
//!
//! # Design Decisions
//! - One breaker per logical service, held in a registry owned by the gateway
//! - Each breaker has its own lock; an open circuit never stalls another service

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// How a finished call counts toward the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// The call never reached the service; counters are left alone.
    Ignored,
}

/// Outcome of [`CircuitBreaker::call`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError<E> {
    /// The breaker is open and the cooldown has not elapsed; nothing was invoked.
    #[error("circuit breaker open")]
    Open,

    /// The wrapped call ran and failed.
    #[error("{0}")]
    Inner(E),
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    pub max_failures: u32,
    pub cooldown: Duration,
    pub half_open_success: u32,
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            max_failures: config.max_failures.max(1),
            cooldown: Duration::from_millis(config.cooldown_ms),
            half_open_success: config.half_open_success.max(1),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
    changed_at: Instant,
}

/// A point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Milliseconds since the last failure, if any.
    pub last_failure_ago_ms: Option<u64>,
    /// Milliseconds since the last state transition.
    pub in_state_ms: u64,
}

/// A per-service circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            service: service.into(),
            settings,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
                changed_at: Instant::now(),
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current state, without applying the lazy Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.failures = 0;
        inner.successes = 0;
        inner.changed_at = Instant::now();
        metrics::record_circuit_transition(&self.service, to.as_str());
        match to {
            CircuitState::Open => {
                tracing::warn!(service = %self.service, from = from.as_str(), "Circuit opened")
            }
            _ => tracing::info!(
                service = %self.service,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit state changed"
            ),
        }
    }

    /// Whether a call may proceed now. Moves Open → Half-Open once the cooldown elapsed.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            if inner.changed_at.elapsed() < self.settings.cooldown {
                return false;
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
        }
        true
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.settings.half_open_success {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // A call admitted before the circuit opened; the open decision stands.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.settings.max_failures {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    /// Run `f` through the breaker; any `Err` counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(f, |result| match result {
            Ok(_) => CallOutcome::Success,
            Err(_) => CallOutcome::Failure,
        })
        .await
    }

    /// Run `f` through the breaker, classifying the outcome with `classify`.
    ///
    /// Use this when a successful call can still be a protocol-level failure,
    /// such as a 5xx response, or when some errors never reached the service.
    pub async fn call_with<F, Fut, T, E, C>(&self, f: F, classify: C) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&Result<T, E>) -> CallOutcome,
    {
        if !self.try_acquire() {
            return Err(CallError::Open);
        }
        let result = f().await;
        match classify(&result) {
            CallOutcome::Success => self.record_success(),
            CallOutcome::Failure => self.record_failure(),
            CallOutcome::Ignored => {}
        }
        result.map_err(CallError::Inner)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            service: self.service.clone(),
            state: inner.state,
            consecutive_failures: inner.failures,
            consecutive_successes: inner.successes,
            last_failure_ago_ms: inner.last_failure.map(|t| t.elapsed().as_millis() as u64),
            in_state_ms: inner.changed_at.elapsed().as_millis() as u64,
        }
    }
}

/// Breakers keyed by logical service name, created on first use.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    settings: BreakerSettings,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// The breaker for `service`, created under the write lock if absent.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(breaker) = breakers.get(service) {
                return breaker.clone();
            }
        }
        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check: another caller may have won the race for the write lock.
        if let Some(breaker) = breakers.get(service) {
            return breaker.clone();
        }
        let breaker = Arc::new(CircuitBreaker::new(service, self.settings));
        breakers.insert(service.to_string(), breaker.clone());
        tracing::debug!(service = %service, "Circuit breaker created");
        breaker
    }

    /// Snapshots of every breaker, sorted by service.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = breakers.values().map(|b| b.snapshot()).collect();
        out.sort_by(|a, b| a.service.cmp(&b.service));
        out
    }

    pub fn len(&self) -> usize {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> BreakerSettings {
        BreakerSettings {
            max_failures: 3,
            cooldown: Duration::from_secs(10),
            half_open_success: 2,
        }
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), CallError<&'static str>> {
        cb.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn ignored(cb: &CircuitBreaker) -> Result<(), CallError<&'static str>> {
        cb.call_with(|| async { Err::<(), _>("no node") }, |_| CallOutcome::Ignored)
            .await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), CallError<&'static str>> {
        cb.call(|| async { Ok::<(), &'static str>(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_max_failures() {
        let cb = CircuitBreaker::new("orders", settings());
        for _ in 0..2 {
            assert_eq!(fail(&cb).await, Err(CallError::Inner("boom")));
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("orders", settings());
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        succeed(&cb).await.unwrap();
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_invoking() {
        let cb = CircuitBreaker::new("orders", settings());
        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }

        let invoked = AtomicU32::new(0);
        let res = cb
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<(), &'static str>(())
            })
            .await;
        assert_eq!(res, Err(CallError::Open));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovers_after_successes() {
        let cb = CircuitBreaker::new("orders", settings());
        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        let invoked = AtomicU32::new(0);
        cb.call(|| async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<(), &'static str>(())
        })
        .await
        .unwrap();
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("orders", settings());
        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(11)).await;

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        // The cooldown restarts from the new transition
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(succeed(&cb).await, Err(CallError::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_classified_failure() {
        let cb = CircuitBreaker::new("orders", settings());
        for _ in 0..3 {
            let status = cb
                .call_with(
                    || async { Ok::<u16, ()>(503) },
                    |r| match r {
                        Ok(s) if *s >= 500 => CallOutcome::Failure,
                        _ => CallOutcome::Success,
                    },
                )
                .await
                .unwrap();
            assert_eq!(status, 503);
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_outcome_leaves_counters() {
        let cb = CircuitBreaker::new("orders", settings());

        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        ignored(&cb).await.unwrap_err();
        assert_eq!(cb.snapshot().consecutive_failures, 2);
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        // Ignored trials never close a half-open circuit
        tokio::time::advance(Duration::from_secs(10)).await;
        for _ in 0..3 {
            ignored(&cb).await.unwrap_err();
        }
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().consecutive_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_isolation() {
        let registry = CircuitBreakerRegistry::new(settings());
        let orders = registry.get("orders");
        assert!(Arc::ptr_eq(&orders, &registry.get("orders")));
        for _ in 0..3 {
            fail(&orders).await.unwrap_err();
        }

        let catalog = registry.get("catalog");
        assert_eq!(catalog.state(), CircuitState::Closed);
        assert!(succeed(&catalog).await.is_ok());

        let snaps = registry.snapshots();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].service, "catalog");
        assert_eq!(snaps[1].state, CircuitState::Open);
    }

    #[test]
    fn test_registry_concurrent_first_use() {
        let registry = Arc::new(CircuitBreakerRegistry::new(settings()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get("orders"))
            })
            .collect();
        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(breakers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }
}
