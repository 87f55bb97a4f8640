//! Exponential backoff shared by the frame relay and the broker reconnect loop.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Exponential retry delay with a ceiling and an optional attempt cap.
///
/// `next_delay()` hands out the delay to wait before the upcoming attempt and
/// advances the schedule. With a cap of N, exactly N delays are handed out
/// before the schedule reports exhaustion.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    multiplier: u32,
    ceiling: Duration,
    max_attempts: Option<u32>,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Doubling backoff from `initial` up to `ceiling`, never exhausted.
    pub fn new(initial: Duration, ceiling: Duration) -> Self {
        Self {
            initial,
            multiplier: 2,
            ceiling,
            max_attempts: None,
            current: initial.min(ceiling),
            attempts: 0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay that the next call to `next_delay()` will return.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.max_attempts, Some(max) if self.attempts >= max)
    }

    /// Take the delay for the upcoming attempt, or `None` once the cap is hit.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.current;
        self.attempts += 1;
        self.current = self
            .current
            .saturating_mul(self.multiplier)
            .min(self.ceiling);
        Some(delay)
    }

    /// Back to the floor after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.ceiling);
        self.attempts = 0;
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        let backoff = Backoff::new(
            Duration::from_secs(config.initial_secs),
            Duration::from_secs(config.max_secs),
        )
        .with_multiplier(config.multiplier);
        match config.max_attempts {
            Some(max) => backoff.with_max_attempts(max),
            None => backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(delays: &[Duration]) -> Vec<u64> {
        delays.iter().map(|d| d.as_secs()).collect()
    }

    #[test]
    fn test_relay_schedule_caps_at_thirty() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<Duration> = (0..8).filter_map(|_| backoff.next_delay()).collect();
        assert_eq!(secs(&delays), vec![1, 2, 4, 8, 16, 30, 30, 30]);
        assert!(!backoff.is_exhausted());
    }

    #[test]
    fn test_broker_schedule_exhausts_after_twelve() {
        let mut backoff =
            Backoff::new(Duration::from_secs(1), Duration::from_secs(60)).with_max_attempts(12);
        let mut delays = Vec::new();
        while let Some(delay) = backoff.next_delay() {
            delays.push(delay);
        }
        assert_eq!(
            secs(&delays),
            vec![1, 2, 4, 8, 16, 32, 60, 60, 60, 60, 60, 60]
        );
        assert_eq!(backoff.attempts(), 12);
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_reset_restarts_at_floor() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::from_secs(8));

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_reset_clears_exhaustion() {
        let mut backoff =
            Backoff::new(Duration::from_secs(1), Duration::from_secs(60)).with_max_attempts(2);
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.is_exhausted());
        backoff.reset();
        assert!(!backoff.is_exhausted());
    }

    #[test]
    fn test_from_config() {
        let config = BackoffConfig {
            initial_secs: 2,
            multiplier: 3,
            max_secs: 20,
            max_attempts: Some(4),
        };
        let mut backoff = Backoff::from(&config);
        let delays: Vec<Duration> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(secs(&delays), vec![2, 6, 18, 20]);
    }
}
