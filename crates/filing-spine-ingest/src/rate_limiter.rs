use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;

use filing_spine_core::{AppError, AppResult};

type Governor = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Token-bucket limiter for outbound SEC traffic.
///
/// SEC fair-access guidelines cap automated clients at 10 requests per
/// second. A single instance of this limiter is shared by every HTTP
/// client in the process; routing a request around it is a defect.
#[derive(Debug, Clone)]
pub struct SecRateLimiter {
    limiter: Arc<Governor>,
    requests_per_second: u32,
}

impl SecRateLimiter {
    pub fn new(requests_per_second: u32) -> AppResult<Self> {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).ok_or_else(|| {
            AppError::ConfigError("requests_per_second must be greater than zero".to_string())
        })?);

        Ok(Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            requests_per_second,
        })
    }

    /// SEC-recommended default of 10 requests/second
    pub fn sec_default() -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(nonzero!(10u32)))),
            requests_per_second: 10,
        }
    }

    /// Wait until a token is available. Called before every outbound
    /// request; when the bucket is empty the caller suspends.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Non-blocking probe, for callers that would rather shed load
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_zero_rate_is_refused() {
        assert!(SecRateLimiter::new(0).is_err());
        assert_eq!(SecRateLimiter::sec_default().requests_per_second(), 10);
    }

    #[tokio::test]
    async fn test_acquire_throttles_to_quota() {
        // REQUIREMENT: Outbound rate never exceeds requests_per_second in
        // any rolling one-second window
        // PURPOSE: Verify the bucket delays callers once the burst is spent

        let limiter = SecRateLimiter::new(5).unwrap();

        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        let elapsed = start.elapsed();

        // 10 permits at 5/sec: the second half must wait about a second
        assert!(elapsed >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_is_serialized() {
        // REQUIREMENT: One process-wide bucket governs all clients
        // PURPOSE: Clones share the bucket rather than multiplying the quota

        let limiter = SecRateLimiter::new(5).unwrap();

        let start = Instant::now();
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(900));
        assert!(elapsed <= Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_try_acquire_sheds_load() {
        let limiter = SecRateLimiter::new(1).unwrap();
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
