//! Timeout enforcement.
//!
//! # Responsibilities
//! - Give every backend call one deadline derived from the route timeout
//! - Share that deadline between connection setup and invocation
//! - Cancel the wrapped future on expiry so nothing keeps running detached
//!
//! Callers cancel by dropping the future; expiry is reported as [`TimedOut`].

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// The deadline passed before the operation completed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("deadline of {0:?} exceeded")]
pub struct TimedOut(pub Duration);

/// A fixed point in time by which a call must finish.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// The full budget this deadline was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Drive `fut` until it completes or the deadline passes, whichever is first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, TimedOut> {
        tokio::time::timeout_at(self.at, fut)
            .await
            .map_err(|_| TimedOut(self.budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_shared_across_steps() {
        let start = Instant::now();
        let deadline = Deadline::after(Duration::from_millis(100));

        let first = deadline
            .run(tokio::time::sleep(Duration::from_millis(60)))
            .await;
        assert!(first.is_ok());
        assert_eq!(start.elapsed(), Duration::from_millis(60));

        // The second step only gets what is left of the budget
        let second = deadline
            .run(tokio::time::sleep(Duration::from_millis(60)))
            .await;
        assert_eq!(second, Err(TimedOut(Duration::from_millis(100))));
        // Expired at the original deadline, not 60ms after the second step began
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_drops_inner_future() {
        struct DropFlag(std::sync::Arc<std::sync::atomic::AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let dropped = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());
        let res = Deadline::after(Duration::from_millis(10))
            .run(async move {
                let _flag = flag;
                std::future::pending::<()>().await
            })
            .await;
        assert!(res.is_err());
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
    }
}
