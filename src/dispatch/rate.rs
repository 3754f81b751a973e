//! Minimum-interval rate limiter for outbound sends.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};

use crate::config::DispatchConfig;

/// Spaces grants at least `min_interval` apart.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.min_interval())
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until `min_interval` has passed since the previous grant.
    /// Returns the instant of this grant.
    pub async fn acquire(&mut self) -> Instant {
        if let Some(last) = self.last {
            let ready_at = last + self.min_interval;
            if Instant::now() < ready_at {
                sleep_until(ready_at).await;
            }
        }
        let now = Instant::now();
        self.last = Some(now);
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_grant_is_immediate() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(Duration::from_millis(10));
        let granted = limiter.acquire().await;
        assert_eq!(granted, start);
    }

    #[tokio::test(start_paused = true)]
    async fn grants_are_spaced_by_min_interval() {
        let mut limiter = RateLimiter::from_config(&DispatchConfig::new(100, 50).unwrap());
        let mut grants = Vec::new();
        for _ in 0..20 {
            grants.push(limiter.acquire().await);
        }
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= limiter.min_interval());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_counts_toward_the_gap() {
        let mut limiter = RateLimiter::new(Duration::from_millis(250));
        let first = limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = limiter.acquire().await;
        // No extra wait once the interval has already elapsed.
        assert_eq!(second - first, Duration::from_secs(1));
    }
}
