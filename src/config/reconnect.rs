//! Exponential-backoff reconnection policy (spec §4.6).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectConfig {
    pub fn from_env() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5 * 60),
            max_attempts: 10,
        }
    }

    /// `delay_n = min(initial * multiplier^(n-1), max_delay)`, `n` 1-based.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi((attempt - 1) as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_then_caps() {
        let cfg = ReconnectConfig::from_env();
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(cfg.delay_for_attempt(3), Duration::from_secs(20));
        // 5 * 2^9 = 2560s, capped at 300s
        assert_eq!(cfg.delay_for_attempt(10), Duration::from_secs(300));
    }
}
