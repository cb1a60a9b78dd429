use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "boxoffice_bookings_created_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "boxoffice_bookings_cancelled_total";

/// Counter: booking attempts rejected for insufficient capacity.
pub const BOOKING_CONFLICTS_TOTAL: &str = "boxoffice_booking_conflicts_total";

/// Counter: waiting-list entries added.
pub const WAITLIST_ADDED_TOTAL: &str = "boxoffice_waitlist_added_total";

/// Counter: waiting-list entries notified by scheduling passes.
pub const WAITLIST_NOTIFIED_TOTAL: &str = "boxoffice_waitlist_notified_total";

/// Counter: waiting-list entries auto-fulfilled into bookings.
pub const WAITLIST_FULFILLED_TOTAL: &str = "boxoffice_waitlist_fulfilled_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: transient-failure retries performed.
pub const RETRY_ATTEMPTS_TOTAL: &str = "boxoffice_retry_attempts_total";

/// Counter: coordinator lock waits that exceeded max_wait.
pub const LOCK_TIMEOUTS_TOTAL: &str = "boxoffice_lock_timeouts_total";

/// Counter: read-cache hits.
pub const CACHE_HITS_TOTAL: &str = "boxoffice_cache_hits_total";

/// Counter: read-cache misses.
pub const CACHE_MISSES_TOTAL: &str = "boxoffice_cache_misses_total";

/// Counter: expired cache entries purged by the sweep.
pub const CACHE_EVICTIONS_TOTAL: &str = "boxoffice_cache_evictions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "boxoffice_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "boxoffice_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if
/// `port` is None.
pub fn init_metrics(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install the fmt tracing subscriber. Call once from the embedding
/// process's startup.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
