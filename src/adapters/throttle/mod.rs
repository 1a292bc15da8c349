//! Provider Throttles
//!
//! Admission control in front of every provider request:
//! - `RateLimiter`: multi-tier sliding window (second through week)
//! - `Cooldown`: fixed minimum spacing between requests
//!
//! Adapters hold a `Throttle` and do not care which policy backs it.

mod cooldown;
mod rate_limiter;

pub use cooldown::Cooldown;
pub use rate_limiter::{RateLimiter, RateLimits, TIER_COUNT, TIER_NAMES, TIER_WINDOWS};

use std::time::Duration;

/// Rate policy bound to one provider
#[derive(Debug)]
pub enum Throttle {
    Tiered(RateLimiter),
    Cooldown(Cooldown),
}

impl Throttle {
    pub fn tiered(limits: RateLimits) -> Self {
        Throttle::Tiered(RateLimiter::new(limits))
    }

    pub fn cooldown(interval: Duration) -> Self {
        Throttle::Cooldown(Cooldown::new(interval))
    }

    /// A throttle that never waits
    pub fn unbounded() -> Self {
        Throttle::tiered(RateLimits::default())
    }

    /// Block until the provider's policy admits one more request
    pub async fn admit(&self) {
        match self {
            Throttle::Tiered(limiter) => limiter.admit().await,
            Throttle::Cooldown(cooldown) => cooldown.admit().await,
        }
    }
}
