use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Fixed minimum delay between consecutive requests to one provider
#[derive(Debug)]
pub struct Cooldown {
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Cooldown {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until `interval` has passed since the previous request, then
    /// record this one
    pub async fn admit(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(previous) = *last {
            let ready_at = previous + self.interval;
            if ready_at > Instant::now() {
                tracing::debug!("Provider cooling down for {:?}", ready_at - Instant::now());
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_call_is_immediate() {
        let cooldown = Cooldown::new(Duration::from_secs(5));
        let start = Instant::now();
        cooldown.admit().await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_calls_are_spaced() {
        let cooldown = Cooldown::new(Duration::from_secs(5));
        let start = Instant::now();

        for _ in 0..4 {
            cooldown.admit().await;
        }

        assert_eq!(Instant::now() - start, Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_time_counts_towards_cooldown() {
        let cooldown = Cooldown::new(Duration::from_secs(5));
        cooldown.admit().await;

        tokio::time::advance(Duration::from_secs(3)).await;
        let before = Instant::now();
        cooldown.admit().await;

        assert_eq!(Instant::now() - before, Duration::from_secs(2));
    }
}
