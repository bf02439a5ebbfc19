//! Service metrics.
//!
//! # Metrics
//! - `composite_service_starts_total` (counter): services that became ready, by service
//! - `composite_service_fatal_total` (counter): fatal conditions, by service and kind
//! - `composite_service_running` (gauge): 1 while the service is started, 0 otherwise
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Prometheus exposition is opt-in via `[observability] metrics_enabled`

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Serve Prometheus metrics on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_service_start(service: &str) {
    metrics::counter!("composite_service_starts_total", "service" => service.to_string()).increment(1);
}

pub fn record_fatal(service: &str, kind: &'static str) {
    metrics::counter!(
        "composite_service_fatal_total",
        "service" => service.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn set_service_running(service: &str, running: bool) {
    let value = if running { 1.0 } else { 0.0 };
    metrics::gauge!("composite_service_running", "service" => service.to_string()).set(value);
}
