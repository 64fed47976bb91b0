//! Process-wide spacing of outbound metadata requests

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Enforces a minimum gap between two consecutive metadata requests.
///
/// One limiter is created per process and shared through `Arc` by every
/// resolver call, including those issued concurrently by playlist workers.
#[derive(Debug)]
pub struct RequestLimiter {
    spacing: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestLimiter {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last_request: Mutex::new(None),
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Wait until the next request slot is free, then claim it
    pub async fn acquire(&self) {
        if self.spacing.is_zero() {
            return;
        }

        // Held across the sleep so callers are released one at a time
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.spacing;
            if ready_at > Instant::now() {
                debug!("Request limiter: waiting {:?}", ready_at - Instant::now());
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RequestLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = RequestLimiter::unlimited();
        let start = std::time::Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_spacing_is_shared_between_tasks() {
        let limiter = Arc::new(RequestLimiter::new(Duration::from_millis(40)));
        let start = std::time::Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // First slot is free, the other three wait one spacing each
        assert!(start.elapsed() >= Duration::from_millis(120));
    }
}
