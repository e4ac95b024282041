//! Per-marketplace request pacing.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::marketplaces::Marketplace;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow,
    Deny { retry_after: Duration },
}

/// Sliding-window limiter, one window per marketplace. Marketplaces without
/// a configured limit are never throttled.
pub struct MarketplaceRateLimiter {
    limits: DashMap<Marketplace, u32>,
    windows: DashMap<Marketplace, VecDeque<Instant>>,
}

impl MarketplaceRateLimiter {
    pub fn new(limits: impl IntoIterator<Item = (Marketplace, u32)>) -> Self {
        let limiter = Self {
            limits: DashMap::new(),
            windows: DashMap::new(),
        };
        for (marketplace, per_minute) in limits {
            if per_minute > 0 {
                limiter.limits.insert(marketplace, per_minute);
            }
        }
        limiter
    }

    /// Try to take a slot now. Denials carry the wait until the oldest
    /// in-window request expires.
    pub fn check(&self, marketplace: Marketplace) -> RateLimitDecision {
        let Some(limit) = self.limits.get(&marketplace).map(|l| *l) else {
            return RateLimitDecision::Allow;
        };

        let now = Instant::now();
        let mut window = self.windows.entry(marketplace).or_default();
        while let Some(front) = window.front()
            && now.duration_since(*front) >= WINDOW
        {
            window.pop_front();
        }

        if (window.len() as u32) < limit {
            window.push_back(now);
            RateLimitDecision::Allow
        } else {
            let retry_after = window
                .front()
                .map(|front| WINDOW.saturating_sub(now.duration_since(*front)))
                .unwrap_or(WINDOW);
            RateLimitDecision::Deny { retry_after }
        }
    }

    /// Block until a slot is available.
    pub async fn acquire(&self, marketplace: Marketplace) {
        loop {
            match self.check(marketplace) {
                RateLimitDecision::Allow => return,
                RateLimitDecision::Deny { retry_after } => {
                    trace!(%marketplace, wait_ms = retry_after.as_millis() as u64, "rate limited");
                    tokio::time::sleep(retry_after.max(Duration::from_millis(50))).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_marketplace_always_allows() {
        let limiter = MarketplaceRateLimiter::new([]);
        for _ in 0..100 {
            assert_eq!(limiter.check(Marketplace::Amazon), RateLimitDecision::Allow);
        }
    }

    #[test]
    fn denies_past_the_limit_with_retry_hint() {
        let limiter = MarketplaceRateLimiter::new([(Marketplace::Etsy, 2)]);
        assert_eq!(limiter.check(Marketplace::Etsy), RateLimitDecision::Allow);
        assert_eq!(limiter.check(Marketplace::Etsy), RateLimitDecision::Allow);
        match limiter.check(Marketplace::Etsy) {
            RateLimitDecision::Deny { retry_after } => {
                assert!(retry_after <= WINDOW);
            }
            RateLimitDecision::Allow => panic!("third request within window must be denied"),
        }
        // Other marketplaces are unaffected.
        assert_eq!(limiter.check(Marketplace::Otto), RateLimitDecision::Allow);
    }

    #[test]
    fn zero_limit_means_unlimited() {
        let limiter = MarketplaceRateLimiter::new([(Marketplace::Amazon, 0)]);
        for _ in 0..10 {
            assert_eq!(limiter.check(Marketplace::Amazon), RateLimitDecision::Allow);
        }
    }
}
