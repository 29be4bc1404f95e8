//! Replication engine configuration.
//!
//! [`CoreConfig`] carries every tunable the engine reads. Defaults come from
//! [`constants::engine_defaults`](crate::constants::engine_defaults);
//! [`CoreConfig::from_env`] applies `COPYTRADE_*` environment overrides on
//! top, which is how deployments tune the engine without code changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{API_BASE_URL, SANDBOX_BASE_URL, engine_defaults as defaults};
use crate::error::{CoreError, Result};

/// All engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Global cap on concurrently in-flight broker calls, shared across all
    /// in-flight fan-outs (cross-tenant backpressure).
    pub max_in_flight_broker_calls: usize,
    /// Per-follower pipeline deadline, measured from dispatch start.
    /// Semaphore waits count against it.
    pub dispatch_timeout: Duration,
    /// Transient broker-error retries per follower order.
    pub max_retries: u32,
    /// Backoff curve: base delay.
    pub retry_base: Duration,
    /// Backoff curve: delay ceiling.
    pub retry_cap: Duration,
    /// Backoff curve: jitter as a percentage of the computed delay.
    pub retry_jitter_pct: u32,
    /// Follower snapshot cache TTL.
    pub follower_snapshot_ttl: Duration,
    /// Pipelines admitted concurrently = CPUs × this multiplier.
    pub worker_pool_multiplier: usize,
    /// Sessions are refreshed proactively this far before expiry.
    pub session_refresh_guard: Duration,
    /// Polling interval for the unknown-order reconciler.
    pub reconcile_interval: Duration,
    /// Broker HTTPS endpoint.
    pub broker_base_url: String,
    /// Use the sandbox endpoint instead of `broker_base_url`.
    pub broker_sandbox: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_in_flight_broker_calls: defaults::MAX_IN_FLIGHT_BROKER_CALLS,
            dispatch_timeout: Duration::from_millis(defaults::DISPATCH_TIMEOUT_MS),
            max_retries: defaults::MAX_RETRIES,
            retry_base: Duration::from_millis(defaults::RETRY_BASE_MS),
            retry_cap: Duration::from_millis(defaults::RETRY_CAP_MS),
            retry_jitter_pct: defaults::RETRY_JITTER_PCT,
            follower_snapshot_ttl: Duration::from_millis(defaults::FOLLOWER_SNAPSHOT_TTL_MS),
            worker_pool_multiplier: defaults::WORKER_POOL_MULTIPLIER,
            session_refresh_guard: Duration::from_millis(defaults::SESSION_REFRESH_GUARD_MS),
            reconcile_interval: Duration::from_millis(defaults::RECONCILE_INTERVAL_MS),
            broker_base_url: API_BASE_URL.to_owned(),
            broker_sandbox: false,
        }
    }
}

impl CoreConfig {
    /// Defaults with `COPYTRADE_*` environment overrides applied.
    ///
    /// Recognized variables mirror the struct fields:
    /// `COPYTRADE_MAX_IN_FLIGHT_BROKER_CALLS`, `COPYTRADE_DISPATCH_TIMEOUT_MS`,
    /// `COPYTRADE_MAX_RETRIES`, `COPYTRADE_RETRY_BASE_MS`,
    /// `COPYTRADE_RETRY_CAP_MS`, `COPYTRADE_RETRY_JITTER_PCT`,
    /// `COPYTRADE_FOLLOWER_SNAPSHOT_TTL_MS`, `COPYTRADE_WORKER_POOL_MULTIPLIER`,
    /// `COPYTRADE_SESSION_REFRESH_GUARD_MS`, `COPYTRADE_RECONCILE_INTERVAL_MS`,
    /// `COPYTRADE_BROKER_BASE_URL`, `COPYTRADE_BROKER_SANDBOX`.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<usize>("COPYTRADE_MAX_IN_FLIGHT_BROKER_CALLS")? {
            cfg.max_in_flight_broker_calls = v;
        }
        if let Some(v) = env_parse::<u64>("COPYTRADE_DISPATCH_TIMEOUT_MS")? {
            cfg.dispatch_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u32>("COPYTRADE_MAX_RETRIES")? {
            cfg.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("COPYTRADE_RETRY_BASE_MS")? {
            cfg.retry_base = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("COPYTRADE_RETRY_CAP_MS")? {
            cfg.retry_cap = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u32>("COPYTRADE_RETRY_JITTER_PCT")? {
            cfg.retry_jitter_pct = v;
        }
        if let Some(v) = env_parse::<u64>("COPYTRADE_FOLLOWER_SNAPSHOT_TTL_MS")? {
            cfg.follower_snapshot_ttl = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<usize>("COPYTRADE_WORKER_POOL_MULTIPLIER")? {
            cfg.worker_pool_multiplier = v;
        }
        if let Some(v) = env_parse::<u64>("COPYTRADE_SESSION_REFRESH_GUARD_MS")? {
            cfg.session_refresh_guard = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("COPYTRADE_RECONCILE_INTERVAL_MS")? {
            cfg.reconcile_interval = Duration::from_millis(v);
        }
        if let Ok(v) = std::env::var("COPYTRADE_BROKER_BASE_URL") {
            cfg.broker_base_url = v;
        }
        if let Some(v) = env_parse::<bool>("COPYTRADE_BROKER_SANDBOX")? {
            cfg.broker_sandbox = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// The endpoint the broker client should target.
    pub fn effective_base_url(&self) -> &str {
        if self.broker_sandbox {
            SANDBOX_BASE_URL
        } else {
            &self.broker_base_url
        }
    }

    /// Concurrent pipeline admissions: CPUs × `worker_pool_multiplier`.
    pub fn worker_pool_size(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus * self.worker_pool_multiplier).max(1)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight_broker_calls == 0 {
            return Err(CoreError::InvalidArgument(
                "max_in_flight_broker_calls must be at least 1".into(),
            ));
        }
        if self.worker_pool_multiplier == 0 {
            return Err(CoreError::InvalidArgument(
                "worker_pool_multiplier must be at least 1".into(),
            ));
        }
        if self.retry_jitter_pct > 100 {
            return Err(CoreError::InvalidArgument(
                "retry_jitter_pct must be within 0..=100".into(),
            ));
        }
        url::Url::parse(&self.broker_base_url)?;
        Ok(())
    }
}

/// Read and parse an environment variable, mapping parse failures to
/// [`CoreError::InvalidArgument`] with the variable name.
fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            CoreError::InvalidArgument(format!("{name} has an unparsable value: {raw:?}"))
        }),
        Err(_) => Ok(None),
    }
}
