//! Injectable clock
//!
//! Every wait in the sync path (budget backoff, throttling retries) goes
//! through a [`Timer`] so tests can simulate elapsed time.

use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Monotonic clock with async sleep
#[async_trait]
pub trait Timer: Send + Sync {
    /// Current monotonic time
    fn now(&self) -> Instant;

    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// [`Timer`] backed by the tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
