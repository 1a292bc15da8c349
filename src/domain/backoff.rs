//! Poll Backoff
//!
//! Wait-interval growth for addresses whose balance did not change.
//! Each no-change check multiplies the interval by a growth factor drawn
//! from a normal distribution centred on the configured factor, floored at
//! 1.0 so the interval never shrinks, and clipped to the maximum.

use rand::distributions::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

/// Default minimum wait between polls (5 minutes)
pub const DEFAULT_MIN_WAIT_SECS: u64 = 300;

/// Default maximum wait between polls (1 day)
pub const DEFAULT_MAX_WAIT_SECS: u64 = 86_400;

/// Default growth factor for an unchanged balance
pub const DEFAULT_GROWTH_FACTOR: f64 = 2.0;

/// Default standard deviation of the growth factor
pub const DEFAULT_JITTER: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub min_wait_secs: u64,
    pub max_wait_secs: u64,
    pub growth_factor: f64,
    /// Standard deviation of the sampled factor; 0 disables jitter
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min_wait_secs: DEFAULT_MIN_WAIT_SECS,
            max_wait_secs: DEFAULT_MAX_WAIT_SECS,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl Backoff {
    /// Deterministic policy without jitter
    pub fn without_jitter(min_wait_secs: u64, max_wait_secs: u64, growth_factor: f64) -> Self {
        Self {
            min_wait_secs,
            max_wait_secs,
            growth_factor,
            jitter: 0.0,
        }
    }

    /// Interval after a check that observed no change
    pub fn grow<R: Rng + ?Sized>(&self, current_secs: u64, rng: &mut R) -> u64 {
        let current = current_secs.clamp(self.min_wait_secs, self.max_wait_secs);
        let factor = self.sample_factor(rng);
        let grown = (current as f64 * factor).round();

        if grown >= self.max_wait_secs as f64 {
            self.max_wait_secs
        } else {
            (grown as u64).max(current)
        }
    }

    /// Interval after a check that observed new funds
    pub fn reset(&self) -> u64 {
        self.min_wait_secs
    }

    fn sample_factor<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.jitter <= 0.0 {
            return self.growth_factor.max(1.0);
        }
        match Normal::new(self.growth_factor, self.jitter) {
            Ok(normal) => normal.sample(rng).max(1.0),
            Err(_) => self.growth_factor.max(1.0),
        }
    }
}
