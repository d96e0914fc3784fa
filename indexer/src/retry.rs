// Retry backoff for failed sync cycles

use crate::config::SyncConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

impl From<&SyncConfig> for RetryConfig {
    fn from(sync: &SyncConfig) -> Self {
        Self {
            initial_delay_ms: sync.retry_initial_ms,
            max_delay_ms: sync.retry_max_ms,
            ..Self::default()
        }
    }
}

/// Consecutive failure counter with exponential delay
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, failures: 0 }
    }

    /// Delay after the nth consecutive failure (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_delay =
            self.config.initial_delay_ms as f64 * self.config.backoff_multiplier.powi(exponent);

        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        let jitter_range = capped_delay * self.config.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Count a failure and return how long to wait
    pub fn record_failure(&mut self) -> Duration {
        let delay = self.calculate_delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(initial: u64, max: u64) -> Backoff {
        Backoff::new(RetryConfig {
            initial_delay_ms: initial,
            max_delay_ms: max,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn test_exponential_backoff() {
        let mut backoff = no_jitter(1000, 10_000);

        assert_eq!(backoff.record_failure().as_millis(), 1000);
        assert_eq!(backoff.record_failure().as_millis(), 2000);
        assert_eq!(backoff.record_failure().as_millis(), 4000);
        assert_eq!(backoff.failures(), 3);

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.record_failure().as_millis(), 1000);
    }

    #[test]
    fn test_max_delay_cap() {
        let backoff = no_jitter(1000, 5000);
        assert_eq!(backoff.calculate_delay(10).as_millis(), 5000);
        assert_eq!(backoff.calculate_delay(u32::MAX).as_millis(), 5000);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let backoff = Backoff::new(RetryConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 1000,
            ..RetryConfig::default()
        });

        for _ in 0..100 {
            let ms = backoff.calculate_delay(3).as_millis();
            assert!((900..=1100).contains(&ms), "delay {} out of range", ms);
        }
    }
}
