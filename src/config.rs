use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tunables for the inventory core. `Default` matches the production
/// settings; `from_env` lets a deployment override them with
/// `BOXOFFICE_*` variables without touching code.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Bounded retry for transient storage failures.
    pub retry: RetryPolicy,
    /// How long a coordinator lock is held before it expires on its own.
    pub lock_hold: Duration,
    /// How long `with_lock` polls for a contended coordinator lock.
    pub lock_max_wait: Duration,
    /// Poll interval while waiting for a coordinator lock.
    pub lock_poll: Duration,
    /// Bound on waiting for a row lock ("select for update" wait).
    pub row_lock_wait: Duration,
    /// TTL for single-entity cache keys.
    pub entity_cache_ttl: Duration,
    /// TTL for list/collection cache keys.
    pub list_cache_ttl: Duration,
    /// TTL for the ticket-availability view.
    pub tickets_cache_ttl: Duration,
    /// Interval of the background sweep over expired locks and cache entries.
    pub sweep_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lock_hold: Duration::from_secs(30),
            lock_max_wait: Duration::from_secs(5),
            lock_poll: Duration::from_millis(100),
            row_lock_wait: Duration::from_secs(5),
            entity_cache_ttl: Duration::from_secs(5 * 60),
            list_cache_ttl: Duration::from_secs(2 * 60),
            tickets_cache_ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

fn env_ms(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = std::env::var("BOXOFFICE_RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            cfg.retry.max_attempts = n;
        }
        if let Some(d) = env_ms("BOXOFFICE_RETRY_BASE_DELAY_MS") {
            cfg.retry.base_delay = d;
        }
        if let Some(d) = env_ms("BOXOFFICE_LOCK_HOLD_MS") {
            cfg.lock_hold = d;
        }
        if let Some(d) = env_ms("BOXOFFICE_LOCK_MAX_WAIT_MS") {
            cfg.lock_max_wait = d;
        }
        if let Some(d) = env_ms("BOXOFFICE_LOCK_POLL_MS") {
            cfg.lock_poll = d;
        }
        if let Some(d) = env_ms("BOXOFFICE_ROW_LOCK_WAIT_MS") {
            cfg.row_lock_wait = d;
        }
        if let Some(d) = env_ms("BOXOFFICE_SWEEP_INTERVAL_MS") {
            cfg.sweep_interval = d;
        }
        cfg
    }
}
