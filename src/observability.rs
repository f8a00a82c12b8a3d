use std::net::SocketAddr;

use crate::proto::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "booked_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "booked_request_duration_seconds";

/// Counter: appointments created.
pub const BOOKINGS_TOTAL: &str = "booked_bookings_total";

/// Counter: booking attempts rejected because the time was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "booked_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "booked_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "booked_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "booked_connections_rejected_total";

/// Gauge: active watch subscriptions across all connections.
pub const WATCHES_ACTIVE: &str = "booked_watches_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "booked_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "booked_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Request variant to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::Book { .. } => "book",
        Request::BookRange { .. } => "book_range",
        Request::Cancel { .. } => "cancel",
        Request::Confirm { .. } => "confirm",
        Request::Complete { .. } => "complete",
        Request::Availability { .. } => "availability",
        Request::Block { .. } => "block",
        Request::Release { .. } => "release",
        Request::Appointments { .. } => "appointments",
        Request::Watch { .. } => "watch",
    }
}
