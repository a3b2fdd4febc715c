//! Steal backoff: how long an idle executor waits before trying again.

use std::time::Duration;

use super::config::StealConfig;

/// Exponential backoff for idle executors, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct StealBackoff {
    /// Delay after the first fruitless round.
    pub base_delay: Duration,

    pub multiplier: f64,

    pub max_delay: Duration,
}

impl StealBackoff {
    pub fn from_config(config: &StealConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_backoff_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_backoff_ms.max(config.base_backoff_ms)),
        }
    }

    /// `idle_rounds` is 1-indexed: delay = base_delay * multiplier^(idle_rounds - 1), capped.
    pub fn next_delay(&self, idle_rounds: u32) -> Duration {
        let exponent = idle_rounds.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}
