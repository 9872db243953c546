use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::SmallRng};

use super::config::{ClientConfig, DEFAULT_MAX_RECONNECT_ATTEMPTS};
use super::types::ReconnectStrategy;

/// Constant-delay reconnect with a hard attempt cap.
///
/// This is the feed's default policy: wait `delay` between attempts, give up once
/// `max_attempts` consecutive attempts have failed.
#[derive(Clone, Debug)]
pub struct FixedDelayReconnect {
    delay: Duration,
    max_attempts: u32,
}

impl FixedDelayReconnect {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.reconnect_delay, config.max_reconnect_attempts)
    }
}

impl Default for FixedDelayReconnect {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl ReconnectStrategy for FixedDelayReconnect {
    fn configure(&mut self, config: &ClientConfig) {
        *self = Self::from_config(config);
    }

    fn next_delay(&mut self) -> Duration {
        self.delay
    }

    fn reset(&mut self) {}

    fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }
}

/// Exponential backoff reconnect strategy with an attempt cap.
///
/// Under a client, the attempt cap comes from `ClientConfig::max_reconnect_attempts` and the
/// configured delay becomes the floor of every wait. Callers can select base/max/factor per deployment; `jitter` spreads reconnect storms when
/// many clients lose the same feed at once.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffReconnect {
    base: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
    max_attempts: u32,
    jitter: bool,
}

impl ExponentialBackoffReconnect {
    pub fn new(base: Duration, max: Duration, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor > 1.0 {
            factor
        } else {
            1.5
        };
        Self {
            base,
            max,
            factor,
            current: base,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            jitter: false,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl Default for ExponentialBackoffReconnect {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 1.5)
    }
}

impl ReconnectStrategy for ExponentialBackoffReconnect {
    fn configure(&mut self, config: &ClientConfig) {
        self.max_attempts = config.max_reconnect_attempts.max(1);
        self.base = self.base.max(config.reconnect_delay);
        self.max = self.max.max(self.base);
        self.current = self.base;
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = (self.current.as_secs_f64() * self.factor).min(self.max.as_secs_f64());
        self.current = Duration::from_secs_f64(next);
        if self.jitter {
            jitter_delay(delay)
        } else {
            delay
        }
    }

    fn reset(&mut self) {
        self.current = self.base;
    }

    fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }
}

/// Stretch `base` by a random factor in `[1.0, 1.5]`. Never returns less than `base`.
pub fn jitter_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }

    let mut rng = SmallRng::from_entropy();
    let jitter: f64 = rng.gen_range(1.0..=1.5);
    let nanos = (base.as_nanos() as f64 * jitter) as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}
