//! Worker pacing: jittered idle polling, consecutive-error pausing, and
//! retry backoff for failed queue items.

use rand::Rng;
use std::time::Duration;

/// Paces a worker's idle polling with `interval + random_jitter`.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    interval: Duration,
    max_jitter: Duration,
}

impl PollScheduler {
    /// Create a scheduler with a base interval and a jitter ceiling.
    pub fn new(interval: Duration, max_jitter: Duration) -> Self {
        Self {
            interval,
            max_jitter,
        }
    }

    /// Compute the next sleep duration: `interval + random_jitter`.
    pub fn next_delay(&self) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
            Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
        };
        self.interval + jitter
    }

    /// Sleep for the next computed delay.
    pub async fn tick(&self) {
        let delay = self.next_delay();
        tracing::trace!(delay_ms = delay.as_millis() as u64, "worker idle sleep");
        tokio::time::sleep(delay).await;
    }
}

/// Tracks consecutive errors to prevent hot retry loops.
///
/// A worker that hits `max_consecutive` errors without a success should
/// pause for `pause_duration` before continuing.
#[derive(Debug)]
pub struct ConsecutiveErrorTracker {
    count: u32,
    max_consecutive: u32,
    pause_duration: Duration,
}

impl ConsecutiveErrorTracker {
    /// Create a new tracker.
    pub fn new(max_consecutive: u32, pause_duration: Duration) -> Self {
        Self {
            count: 0,
            max_consecutive,
            pause_duration,
        }
    }

    /// Record an error. Returns true if the worker should pause.
    pub fn record_error(&mut self) -> bool {
        self.count += 1;
        self.count >= self.max_consecutive
    }

    /// Record a success, resetting the counter.
    pub fn record_success(&mut self) {
        self.count = 0;
    }

    /// How long to pause.
    pub fn pause_duration(&self) -> Duration {
        self.pause_duration
    }

    /// Current consecutive error count.
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Exponential backoff for re-queued items: 2^attempt seconds capped at
/// five minutes, plus up to one second of jitter.
pub fn retry_backoff(attempt: u32) -> Duration {
    let base = 2u64.saturating_pow(attempt).min(300);
    let jitter_ms = rand::thread_rng().gen_range(0..=1000);
    Duration::from_secs(base) + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_within_bounds() {
        let scheduler = PollScheduler::new(Duration::from_secs(2), Duration::from_secs(1));
        for _ in 0..100 {
            let delay = scheduler.next_delay();
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(3));
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let scheduler = PollScheduler::new(Duration::from_secs(5), Duration::ZERO);
        assert_eq!(scheduler.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn error_tracker_pauses_after_threshold() {
        let mut tracker = ConsecutiveErrorTracker::new(3, Duration::from_secs(60));
        assert!(!tracker.record_error());
        assert!(!tracker.record_error());
        assert!(tracker.record_error());
        assert_eq!(tracker.count(), 3);

        tracker.record_success();
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn retry_backoff_grows_and_caps() {
        assert!(retry_backoff(0) >= Duration::from_secs(1));
        assert!(retry_backoff(0) < Duration::from_secs(3));
        assert!(retry_backoff(3) >= Duration::from_secs(8));
        // Capped at five minutes (plus jitter)
        assert!(retry_backoff(30) < Duration::from_secs(302));
    }

    #[tokio::test]
    async fn tick_sleeps() {
        let scheduler = PollScheduler::new(Duration::from_millis(10), Duration::ZERO);
        let start = tokio::time::Instant::now();
        scheduler.tick().await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
