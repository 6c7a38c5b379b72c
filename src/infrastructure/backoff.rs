//! Exponential backoff with jitter, used between registry retries

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay applied as +/- jitter (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 50,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

pub struct ExponentialBackoff {
    config: BackoffConfig,
    next_delay_ms: u64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let initial = config.initial_delay_ms;
        Self {
            config,
            next_delay_ms: initial,
            attempt: 0,
        }
    }

    /// Delay to sleep before the next attempt. The first call returns the
    /// initial delay; each following call grows by `multiplier` up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let base = (self.next_delay_ms as f64).min(self.config.max_delay_ms as f64);
        self.next_delay_ms =
            (base * self.config.multiplier).min(self.config.max_delay_ms as f64) as u64;

        let delay = if self.config.jitter_factor > 0.0 {
            let range = base * self.config.jitter_factor;
            base + rand::rng().random_range(-range..=range)
        } else {
            base
        };

        Duration::from_millis(delay.max(1.0) as u64)
    }

    pub fn reset(&mut self) {
        self.next_delay_ms = self.config.initial_delay_ms;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(initial_delay_ms: u64, max_delay_ms: u64, multiplier: f64) -> ExponentialBackoff {
        ExponentialBackoff::with_config(BackoffConfig {
            initial_delay_ms,
            max_delay_ms,
            multiplier,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn test_starts_at_initial_and_doubles() {
        let mut backoff = no_jitter(100, 10_000, 2.0);

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_caps_at_max() {
        let mut backoff = no_jitter(1_000, 5_000, 10.0);

        for _ in 0..5 {
            backoff.next_delay();
        }

        assert_eq!(backoff.next_delay(), Duration::from_millis(5_000));
    }

    #[test]
    fn test_reset() {
        let mut backoff = no_jitter(100, 10_000, 2.0);
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 100,
            multiplier: 2.0,
            jitter_factor: 0.5,
        });

        for _ in 0..20 {
            let ms = backoff.next_delay().as_millis();
            assert!((50..=150).contains(&ms), "delay {ms} out of range");
        }
    }
}
