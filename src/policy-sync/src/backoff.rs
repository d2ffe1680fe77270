//! Exponential backoff state and the sleep abstraction used by the engine

use async_trait::async_trait;
use std::time::Duration;

/// Exponential backoff state threaded through a retry loop
///
/// Tracks the delay to use next and the total time already spent waiting,
/// so caps on either can be checked without a wall clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffState {
    next_delay: Duration,
    elapsed: Duration,
    max_delay: Option<Duration>,
}

impl BackoffState {
    /// Start at `initial`, doubling without bound
    pub fn new(initial: Duration) -> Self {
        Self {
            next_delay: initial,
            elapsed: Duration::ZERO,
            max_delay: None,
        }
    }

    /// Clamp every delay to `max_delay`
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self.next_delay = self.next_delay.min(max_delay);
        self
    }

    /// Delay the next wait would use
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Total time spent waiting so far
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Double the next delay, respecting the ceiling
    pub fn grow(&mut self) {
        let doubled = self.next_delay.saturating_mul(2);
        self.next_delay = match self.max_delay {
            Some(max) => doubled.min(max),
            None => doubled,
        };
    }

    /// Account for a wait of the next delay and return it
    pub fn record_wait(&mut self) -> Duration {
        let delay = self.next_delay;
        self.elapsed = self.elapsed.saturating_add(delay);
        delay
    }

    /// Whether waiting once more would push the total past `budget`
    pub fn would_exceed(&self, budget: Duration) -> bool {
        self.elapsed.saturating_add(self.next_delay) > budget
    }

    /// Whether the next delay on its own is larger than `cap`
    pub fn delay_exceeds(&self, cap: Duration) -> bool {
        self.next_delay > cap
    }
}

/// Source of waits for the retry loops
///
/// Production code uses [`TokioSleeper`]; tests substitute an implementation
/// that records delays without waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let mut backoff = BackoffState::new(Duration::from_secs(1));
        let mut delays = Vec::new();
        for _ in 0..5 {
            delays.push(backoff.record_wait());
            backoff.grow();
        }
        assert_eq!(
            delays,
            [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec()
        );
        assert_eq!(backoff.elapsed(), Duration::from_secs(31));
        assert_eq!(backoff.next_delay(), Duration::from_secs(32));
    }

    #[test]
    fn test_backoff_respects_max_delay() {
        let mut backoff =
            BackoffState::new(Duration::from_secs(8)).with_max_delay(Duration::from_secs(10));
        backoff.grow();
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        backoff.grow();
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_budget_checks() {
        let mut backoff = BackoffState::new(Duration::from_secs(1));
        for _ in 0..4 {
            backoff.record_wait();
            backoff.grow();
        }
        // 1 + 2 + 4 + 8 spent, 16 next
        assert!(!backoff.would_exceed(Duration::from_secs(31)));
        assert!(backoff.would_exceed(Duration::from_secs(30)));
        assert!(!backoff.delay_exceeds(Duration::from_secs(30)));

        backoff.grow();
        assert!(backoff.delay_exceeds(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_sleeper_waits() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(5)).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
