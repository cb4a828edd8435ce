use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: allocate calls. Labels: outcome (ok, conflict, duplicate, not_found, timeout, invalid, store_error).
pub const ALLOCATIONS_TOTAL: &str = "resalloc_allocations_total";

/// Histogram: allocate latency in seconds, lock wait included.
pub const ALLOCATE_DURATION_SECONDS: &str = "resalloc_allocate_duration_seconds";

/// Counter: successful deallocations.
pub const DEALLOCATIONS_TOTAL: &str = "resalloc_deallocations_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: time spent waiting for a per-resource lock, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "resalloc_lock_wait_seconds";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "resalloc_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "resalloc_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "resalloc_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install a fmt subscriber filtered by `filter` (e.g. `info` or
/// `resalloc=debug`). Returns false if a subscriber was already set.
pub fn init_tracing(filter: &str) -> bool {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
