//! Exponential backoff for transient broker errors.

use std::time::Duration;

use rand::Rng;

use crate::config::CoreConfig;

/// The backoff curve: `base × 2^attempt`, capped, with symmetric jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    jitter_pct: u32,
    /// Retries allowed beyond the first attempt.
    pub max_retries: u32,
}

impl BackoffPolicy {
    /// Lift the curve out of the engine configuration.
    pub fn from_config(cfg: &CoreConfig) -> Self {
        Self {
            base: cfg.retry_base,
            cap: cfg.retry_cap,
            jitter_pct: cfg.retry_jitter_pct.min(100),
            max_retries: cfg.max_retries,
        }
    }

    /// Delay before retry number `attempt` (0-based), jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let cap_ms = self.cap.as_millis() as u64;
        let exp_ms = base_ms
            .saturating_mul(1u64 << attempt.min(32))
            .min(cap_ms)
            .max(1);

        let jitter_span = exp_ms * u64::from(self.jitter_pct) / 100;
        let jittered = if jitter_span == 0 {
            exp_ms as i64
        } else {
            let offset = rand::thread_rng().gen_range(-(jitter_span as i64)..=jitter_span as i64);
            exp_ms as i64 + offset
        };
        Duration::from_millis(jittered.max(1) as u64)
    }
}
