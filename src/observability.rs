use std::net::SocketAddr;

use crate::error::BookingError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: lifecycle operations executed. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "villabook_operations_total";

/// Histogram: lifecycle operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "villabook_operation_duration_seconds";

/// Counter: reservations rejected because the dates were taken.
pub const CALENDAR_CONFLICTS_TOTAL: &str = "villabook_calendar_conflicts_total";

/// Counter: payment gateway failures. Labels: call.
pub const PAYMENT_FAILURES_TOTAL: &str = "villabook_payment_failures_total";

/// Counter: reservations rolled back after a failed authorization.
pub const HOLD_COMPENSATIONS_TOTAL: &str = "villabook_hold_compensations_total";

// ── Sweeper ─────────────────────────────────────────────────────

/// Counter: holds expired by the sweeper.
pub const HOLDS_EXPIRED_TOTAL: &str = "villabook_holds_expired_total";

/// Counter: expire attempts that failed and will be retried.
pub const SWEEP_FAILURES_TOTAL: &str = "villabook_sweep_failures_total";

/// Counter: orphaned calendar events released by reconciliation.
pub const ORPHANS_RELEASED_TOTAL: &str = "villabook_orphans_released_total";

/// Histogram: sweep pass duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "villabook_sweep_duration_seconds";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "villabook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "villabook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Record outcome and latency of one lifecycle operation.
pub fn record_operation<T>(op: &'static str, started: std::time::Instant, result: &Result<T, BookingError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}
