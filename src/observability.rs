use std::net::SocketAddr;

use crate::protocol::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: requests handled by the transport. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "studyspace_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "studyspace_request_duration_seconds";

/// Counter: claim transitions attempted. Labels: op, outcome (`ok` or an error code).
pub const TRANSITIONS_TOTAL: &str = "studyspace_transitions_total";

// ── Expiry sweeps ───────────────────────────────────────────────

/// Counter: sweep actions. Labels: sweep (`remind`, `expire`, `force_check_out`), outcome.
pub const SWEEP_ACTIONS_TOTAL: &str = "studyspace_sweep_actions_total";

/// Histogram: wall time of one sweep tick in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "studyspace_sweep_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "studyspace_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "studyspace_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "studyspace_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "studyspace_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "studyspace_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a request to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::Provision { .. } => "provision",
        Request::Book { .. } => "book",
        Request::CheckIn { .. } => "check_in",
        Request::Cancel { .. } => "cancel",
        Request::CheckOut { .. } => "check_out",
        Request::GetSpace { .. } => "get_space",
        Request::ListSpaces => "list_spaces",
        Request::Schedule { .. } => "schedule",
        Request::Search { .. } => "search",
        Request::Options => "options",
        Request::MyClaims { .. } => "my_claims",
        Request::History { .. } => "history",
        Request::SpaceHistory { .. } => "space_history",
        Request::Notifications { .. } => "notifications",
        Request::Rate { .. } => "rate",
        Request::Ratings { .. } => "ratings",
        Request::Subscribe { .. } => "subscribe",
    }
}
