//! Sliding-Window Rate Limiter
//!
//! Multi-tier admission control for one provider. Limits are given per
//! second, minute, hour, day and week; a tier set to 0 is unconstrained at
//! that granularity and the next coarser tier decides.
//!
//! The limiter keeps the instants of past requests (newest first, pruned
//! after one week) and recounts them on every admission. Tier counts are
//! cumulative: the minute count includes the requests of the last second.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Number of configurable tiers
pub const TIER_COUNT: usize = 5;

/// Window length of each tier, finest first
pub const TIER_WINDOWS: [Duration; TIER_COUNT] = [
    Duration::from_secs(1),
    Duration::from_secs(60),
    Duration::from_secs(3_600),
    Duration::from_secs(86_400),
    Duration::from_secs(604_800),
];

/// Human-readable tier names, used in logs
pub const TIER_NAMES: [&str; TIER_COUNT] = ["second", "minute", "hour", "day", "week"];

/// Request ceilings per tier: [second, minute, hour, day, week]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateLimits([u32; TIER_COUNT]);

impl RateLimits {
    pub fn new(limits: [u32; TIER_COUNT]) -> Self {
        Self(limits)
    }

    /// Build from a config list; missing trailing tiers are disabled.
    /// Returns `None` for more than five entries.
    pub fn from_slice(limits: &[u32]) -> Option<Self> {
        if limits.len() > TIER_COUNT {
            return None;
        }
        let mut tiers = [0u32; TIER_COUNT];
        tiers[..limits.len()].copy_from_slice(limits);
        Some(Self(tiers))
    }

    /// Ceiling for a tier, `None` when the tier is disabled
    pub fn ceiling(&self, tier: usize) -> Option<u32> {
        self.0.get(tier).copied().filter(|c| *c > 0)
    }

    /// True when no tier is configured
    pub fn is_unbounded(&self) -> bool {
        self.0.iter().all(|c| *c == 0)
    }

    pub fn as_array(&self) -> [u32; TIER_COUNT] {
        self.0
    }
}

/// Sliding-window limiter serializing all callers for one provider
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    /// Request instants, newest at the front
    history: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    /// Wait until one more request complies with every tier, then record it.
    ///
    /// The history lock is held while sleeping, so concurrent callers queue
    /// up behind the one currently waiting.
    pub async fn admit(&self) {
        let mut history = self.history.lock().await;

        // Recount after every sleep: waiting out a finer tier can still
        // leave a coarser tier full
        loop {
            let now = Instant::now();
            prune(&mut history, now);

            match self.required_delay(&history, now) {
                Some((tier, delay)) => {
                    tracing::debug!(
                        "Rate limit reached for {} tier ({} requests), waiting {:?}",
                        TIER_NAMES[tier],
                        self.limits.0[tier],
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => break,
            }
        }

        history.push_front(Instant::now());
    }

    /// Number of requests still inside the longest window
    pub async fn recorded(&self) -> usize {
        self.history.lock().await.len()
    }

    /// The first violated tier, finest to coarsest, and the delay until its
    /// oldest in-window request ages out
    fn required_delay(&self, history: &VecDeque<Instant>, now: Instant) -> Option<(usize, Duration)> {
        let counts = tier_counts(history, now);

        for (tier, count) in counts.iter().enumerate() {
            let Some(ceiling) = self.limits.ceiling(tier) else {
                continue;
            };
            if *count < ceiling as usize {
                continue;
            }
            let oldest = history[count - 1];
            let age = now.saturating_duration_since(oldest);
            return Some((tier, TIER_WINDOWS[tier].saturating_sub(age)));
        }

        None
    }
}

/// Cumulative request counts per tier window ending at `now`
fn tier_counts(history: &VecDeque<Instant>, now: Instant) -> [usize; TIER_COUNT] {
    let mut counts = [0usize; TIER_COUNT];

    for instant in history {
        let age = now.saturating_duration_since(*instant);
        if age >= TIER_WINDOWS[TIER_COUNT - 1] {
            break;
        }
        for (tier, window) in TIER_WINDOWS.iter().enumerate() {
            if age < *window {
                counts[tier] += 1;
            }
        }
    }

    counts
}

/// Drop requests older than the longest window
fn prune(history: &mut VecDeque<Instant>, now: Instant) {
    let horizon = TIER_WINDOWS[TIER_COUNT - 1];
    while let Some(oldest) = history.back() {
        if now.saturating_duration_since(*oldest) >= horizon {
            history.pop_back();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_limits_from_slice_pads_missing_tiers() {
        let limits = RateLimits::from_slice(&[0, 30, 0, 1440]).unwrap();
        assert_eq!(limits.as_array(), [0, 30, 0, 1440, 0]);
        assert_eq!(limits.ceiling(0), None);
        assert_eq!(limits.ceiling(1), Some(30));
        assert_eq!(limits.ceiling(4), None);
        assert!(!limits.is_unbounded());

        assert!(RateLimits::from_slice(&[1, 2, 3, 4, 5, 6]).is_none());
        assert!(RateLimits::from_slice(&[]).unwrap().is_unbounded());
    }

    #[test]
    fn test_tier_counts_are_cumulative() {
        let now = Instant::now() + Duration::from_secs(300_000);
        let history: VecDeque<Instant> = vec![
            now - Duration::from_millis(500),
            now - Duration::from_secs(30),
            now - Duration::from_secs(1_800),
            now - Duration::from_secs(7_200),
            now - Duration::from_secs(200_000),
        ]
        .into();

        assert_eq!(tier_counts(&history, now), [1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_thirty_per_minute_spans_a_minute() {
        let limiter = RateLimiter::new(RateLimits::from_slice(&[0, 30, 0, 1440]).unwrap());
        let mut stamps = Vec::new();

        for _ in 0..31 {
            limiter.admit().await;
            stamps.push(Instant::now());
        }

        let span = stamps[30] - stamps[0];
        assert!(span >= Duration::from_secs(60), "span was {:?}", span);
        // The first thirty go through without waiting
        assert!(stamps[29] - stamps[0] < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_second_tier() {
        let limiter = RateLimiter::new(RateLimits::new([2, 0, 0, 0, 0]));
        let start = Instant::now();

        for _ in 0..5 {
            limiter.admit().await;
        }

        // Requests 3 and 5 each wait for the second window to roll over
        assert!(Instant::now() - start >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coarser_tier_still_enforced_after_finer_wait() {
        // 2 per second but only 3 per minute
        let limiter = RateLimiter::new(RateLimits::new([2, 3, 0, 0, 0]));
        let start = Instant::now();

        for _ in 0..4 {
            limiter.admit().await;
        }

        assert!(Instant::now() - start >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_never_waits() {
        let limiter = RateLimiter::new(RateLimits::default());
        let start = Instant::now();

        for _ in 0..100 {
            limiter.admit().await;
        }

        assert_eq!(Instant::now(), start);
        assert_eq!(limiter.recorded().await, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_pruned_after_a_week() {
        let limiter = RateLimiter::new(RateLimits::default());
        limiter.admit().await;
        limiter.admit().await;

        tokio::time::advance(Duration::from_secs(604_800)).await;
        limiter.admit().await;

        assert_eq!(limiter.recorded().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_serialized() {
        let limiter = Arc::new(RateLimiter::new(RateLimits::new([1, 0, 0, 0, 0])));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.admit().await;
                    Instant::now()
                })
            })
            .collect();

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();

        assert!(stamps[1] - stamps[0] >= Duration::from_secs(1));
        assert!(stamps[2] - start >= Duration::from_secs(2));
    }
}
