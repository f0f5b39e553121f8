//! Exponential backoff with jitter
//!
//! Used for broker reconnects, transient fetch retries and embedding retries.

use crate::config::BrokerConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff schedule: `base * 2^attempt`, capped, with ± jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
}

impl Backoff {
    /// `jitter` is a fraction in [0, 1); 0.2 spreads each delay over ±20%
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap: cap.max(base),
            jitter: jitter.clamp(0.0, 0.99),
        }
    }

    pub fn from_broker_config(config: &BrokerConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_base_ms),
            Duration::from_millis(config.reconnect_cap_ms),
            config.reconnect_jitter,
        )
    }

    /// Delay before retry number `attempt` (0-based) without jitter
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before retry number `attempt` (0-based), jittered and never above the cap
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal(attempt);
        if self.jitter == 0.0 {
            return nominal;
        }

        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        nominal.mul_f64(1.0 + spread).min(self.cap)
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconnect() -> Backoff {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 0.2)
    }

    #[test]
    fn test_nominal_doubles_until_cap() {
        let backoff = reconnect();
        assert_eq!(backoff.nominal(0), Duration::from_secs(1));
        assert_eq!(backoff.nominal(1), Duration::from_secs(2));
        assert_eq!(backoff.nominal(5), Duration::from_secs(32));
        assert_eq!(backoff.nominal(6), Duration::from_secs(60));
        assert_eq!(backoff.nominal(40), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = reconnect();
        for attempt in 0..8 {
            let nominal = backoff.nominal(attempt).as_secs_f64();
            for _ in 0..50 {
                let delay = backoff.delay(attempt).as_secs_f64();
                assert!(delay >= nominal * 0.8 - 1e-9, "{} < 0.8 * {}", delay, nominal);
                assert!(delay <= (nominal * 1.2).min(60.0) + 1e-9);
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 0.0);
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(10), Duration::from_secs(1));
    }
}
