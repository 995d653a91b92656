//! Token bucket rate limiting.
//!
//! Buckets are created lazily per key and the whole key space is discarded on a
//! fixed sweep interval. A sweep hands every active key a fresh, full bucket,
//! so the bound on memory costs some per-key precision right after a sweep.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// A single token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-key token bucket limiter with a fixed refill rate and burst capacity.
///
/// Buckets live in a sharded map, so an exhausted key never blocks admission
/// checks for unrelated keys.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    rate: f64,
    burst: f64,
}

impl RateLimiter {
    /// Create a limiter refilling `rate` tokens per second up to `burst`.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            rate,
            burst: f64::from(burst),
        }
    }

    /// Limiter admitting `limit` requests per `window`.
    pub fn per_window(limit: u32, window: Duration) -> Self {
        let secs = window.as_secs_f64().max(f64::EPSILON);
        Self::new(f64::from(limit) / secs, limit)
    }

    /// Withdraw one token for `key`. Returns false when the bucket is empty.
    pub fn allow(&self, key: &str) -> bool {
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            return bucket.try_acquire(self.burst, self.rate);
        }
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.rate)
    }

    /// Discard every bucket.
    pub fn sweep(&self) -> usize {
        let dropped = self.buckets.len();
        self.buckets.clear();
        dropped
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn matches(&self, rate: f64, burst: u32) -> bool {
        (self.rate - rate).abs() < f64::EPSILON && self.burst == f64::from(burst)
    }
}

/// Limiters for rate-limit rules, keyed by rule name and created on first use.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the limiter for `name`, creating it (or replacing it when the rule's
    /// limits changed) under the write lock.
    pub fn get_or_create(&self, name: &str, limit: u32, window: Duration) -> Arc<RateLimiter> {
        let rate = f64::from(limit) / window.as_secs_f64().max(f64::EPSILON);
        {
            let limiters = self.limiters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(limiter) = limiters.get(name) {
                if limiter.matches(rate, limit) {
                    return limiter.clone();
                }
            }
        }

        let mut limiters = self.limiters.write().unwrap_or_else(PoisonError::into_inner);
        // Another task may have created it while we waited for the write lock.
        if let Some(limiter) = limiters.get(name) {
            if limiter.matches(rate, limit) {
                return limiter.clone();
            }
        }
        let limiter = Arc::new(RateLimiter::per_window(limit, window));
        limiters.insert(name.to_string(), limiter.clone());
        tracing::debug!(rule = %name, limit, window_ms = window.as_millis() as u64, "Rate limiter created");
        limiter
    }

    /// Forget the limiter for a deleted rule.
    pub fn remove(&self, name: &str) {
        self.limiters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Sweep every registered limiter. Returns the number of discarded buckets.
    pub fn sweep_all(&self) -> usize {
        let limiters = self.limiters.read().unwrap_or_else(PoisonError::into_inner);
        limiters.values().map(|l| l.sweep()).sum()
    }
}

/// Periodically discard all buckets until shutdown.
pub async fn run_sweeper(
    default_limiter: Option<Arc<RateLimiter>>,
    registry: Arc<RateLimiterRegistry>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    tracing::info!(interval_secs = interval.as_secs(), "Rate limiter sweeper starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut dropped = registry.sweep_all();
                if let Some(limiter) = &default_limiter {
                    dropped += limiter.sweep();
                }
                tracing::debug!(dropped, "Rate limiter buckets swept");
            }
            _ = shutdown.recv() => {
                tracing::info!("Rate limiter sweeper received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let limiter = RateLimiter::new(1.0, 5);

        for _ in 0..5 {
            assert!(limiter.allow("k"));
        }
        assert!(!limiter.allow("k"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        // A long idle period never accumulates beyond burst capacity
        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..5 {
            assert!(limiter.allow("k"));
        }
        assert!(!limiter.allow("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_isolated() {
        let limiter = RateLimiter::new(1.0, 2);
        assert!(limiter.allow("ip:1.2.3.4"));
        assert!(limiter.allow("ip:1.2.3.4"));
        assert!(!limiter.allow("ip:1.2.3.4"));

        assert!(limiter.allow("ip:5.6.7.8"));
        assert_eq!(limiter.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_resets_buckets() {
        let limiter = RateLimiter::new(1.0, 1);
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        assert_eq!(limiter.sweep(), 1);
        assert!(limiter.is_empty());
        assert!(limiter.allow("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_window() {
        let limiter = RateLimiter::per_window(10, Duration::from_secs(10));
        for _ in 0..10 {
            assert!(limiter.allow("k"));
        }
        assert!(!limiter.allow("k"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_reuses_and_replaces() {
        let registry = RateLimiterRegistry::new();
        let a = registry.get_or_create("orders", 5, Duration::from_secs(1));
        let b = registry.get_or_create("orders", 5, Duration::from_secs(1));
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.get_or_create("orders", 10, Duration::from_secs(1));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_shutdown() {
        let registry = Arc::new(RateLimiterRegistry::new());
        let limiter = Arc::new(RateLimiter::new(1.0, 1));
        assert!(limiter.allow("k"));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_sweeper(
            Some(limiter.clone()),
            registry,
            Duration::from_secs(300),
            rx,
        ));

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(limiter.is_empty());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
