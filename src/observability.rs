use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "innkeep_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "innkeep_http_request_duration_seconds";

// ── Booking workflow ────────────────────────────────────────────

/// Counter: booking requests accepted by intake.
pub const BOOKING_REQUESTS_CREATED_TOTAL: &str = "innkeep_booking_requests_created_total";

/// Counter: booking requests moved to a terminal state. Labels: status.
pub const BOOKING_REQUESTS_RESOLVED_TOTAL: &str = "innkeep_booking_requests_resolved_total";

/// Counter: resolver outcomes. Labels: outcome.
pub const RESOLUTIONS_TOTAL: &str = "innkeep_resolutions_total";

/// Histogram: time from dequeue to terminal state, in seconds.
pub const RESOLUTION_DURATION_SECONDS: &str = "innkeep_resolution_duration_seconds";

/// Counter: bookings committed past the exclusion constraint.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "innkeep_bookings_committed_total";

// ── USE metrics (queue utilization) ─────────────────────────────

/// Counter: jobs accepted by the queue.
pub const JOBS_ENQUEUED_TOTAL: &str = "innkeep_jobs_enqueued_total";

/// Counter: jobs dropped or rescheduled because their accommodation was busy.
/// Labels: policy.
pub const JOBS_COALESCED_TOTAL: &str = "innkeep_jobs_coalesced_total";

/// Counter: jobs whose handler returned an error.
pub const JOBS_FAILED_TOTAL: &str = "innkeep_jobs_failed_total";

/// Gauge: jobs currently executing.
pub const JOBS_IN_FLIGHT: &str = "innkeep_jobs_in_flight";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "innkeep_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
