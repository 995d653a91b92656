//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend node of a logical service
//! - Track a live exponentially weighted moving average of call latency
//!
//! The estimate is stored as `f64` bits in an atomic so latency reports only
//! need the balancer's read lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// A single backend node.
#[derive(Debug)]
pub struct Backend {
    /// Opaque node identifier.
    pub id: String,
    /// Network address (`host:port`).
    pub addr: String,
    /// Current EWMA latency in milliseconds, as `f64` bits.
    ewma_ms: AtomicU64,
    /// Number of latency samples observed.
    samples: AtomicU64,
}

impl Backend {
    /// Create a backend with an unknown (zero) latency estimate.
    pub fn new(id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
            ewma_ms: AtomicU64::new(0f64.to_bits()),
            samples: AtomicU64::new(0),
        }
    }

    /// Backend whose identifier is its address.
    pub fn from_addr(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        Self::new(addr.clone(), addr)
    }

    /// Current latency estimate in milliseconds. Zero until the first sample.
    pub fn latency_ms(&self) -> f64 {
        f64::from_bits(self.ewma_ms.load(Ordering::Relaxed))
    }

    pub fn sample_count(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Fold a sample into the estimate: `ewma = alpha * sample + (1 - alpha) * ewma`.
    ///
    /// Returns the new estimate.
    pub fn observe(&self, sample_ms: f64, alpha: f64) -> f64 {
        let mut current = self.ewma_ms.load(Ordering::Relaxed);
        loop {
            let next = alpha * sample_ms + (1.0 - alpha) * f64::from_bits(current);
            match self.ewma_ms.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.samples.fetch_add(1, Ordering::Relaxed);
                    return next;
                }
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe() {
        let b = Backend::from_addr("127.0.0.1:8080");
        assert_eq!(b.latency_ms(), 0.0);
        assert_eq!(b.id, b.addr);

        let v = b.observe(100.0, 0.5);
        assert!((v - 50.0).abs() < 1e-9);
        let v = b.observe(100.0, 0.5);
        assert!((v - 75.0).abs() < 1e-9);
        assert_eq!(b.sample_count(), 2);
    }

    #[test]
    fn test_concurrent_observe() {
        let b = std::sync::Arc::new(Backend::from_addr("n"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = b.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        b.observe(10.0, 0.2);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(b.sample_count(), 8000);
        assert!((b.latency_ms() - 10.0).abs() < 1e-6);
    }
}
