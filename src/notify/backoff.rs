//! Exponential backoff for transport retries: 1s, 2s, 4s, capped.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    base: Duration,
    max: Duration,
}

impl Backoff {
    const DEFAULT_BASE: Duration = Duration::from_secs(1);
    const DEFAULT_MAX: Duration = Duration::from_secs(4);

    pub fn new() -> Self {
        Self::with_config(Self::DEFAULT_BASE, Self::DEFAULT_MAX)
    }

    pub fn with_config(base: Duration, max: Duration) -> Self {
        Self {
            attempt: 0,
            base,
            max,
        }
    }

    /// Delay before the next retry; doubles per call until the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn current_delay(&self) -> Duration {
        let multiplier = 2u64.saturating_pow(self.attempt);
        let ms = (self.base.as_millis() as u64).saturating_mul(multiplier);
        Duration::from_millis(ms.min(self.max.as_millis() as u64))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_one_two_four_capped() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4)); // capped
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn no_overflow_on_many_attempts() {
        let mut backoff = Backoff::new();
        for _ in 0..200 {
            assert!(backoff.next_delay() <= Duration::from_secs(4));
        }
    }
}
