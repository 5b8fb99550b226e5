//! Metrics collection and exposition.
//!
//! # Metrics
//! - `logxy_requests_total` (counter): requests by method, status
//! - `logxy_request_duration_seconds` (histogram): arrival to last phase
//! - `logxy_upstream_errors_total` (counter): requests with no upstream response
//! - `logxy_request_body_bytes_total` / `logxy_response_body_bytes_total` (counters)
//!
//! Without an installed recorder every update is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::observability::record::ObservabilityRecord;

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Update request metrics from a finished access record.
pub fn record_request(record: &ObservabilityRecord) {
    let status = record
        .resp
        .as_ref()
        .map_or_else(|| "502".to_string(), |r| r.status_code.to_string());

    metrics::counter!(
        "logxy_requests_total",
        "method" => record.req.method.clone(),
        "status" => status
    )
    .increment(1);

    if let Some(last) = record.latency.iter().map(|e| e.elapsed).max() {
        metrics::histogram!("logxy_request_duration_seconds").record(last.as_secs_f64());
    }

    metrics::counter!("logxy_request_body_bytes_total").increment(record.req.body_bytes);
    match &record.resp {
        Some(resp) => {
            metrics::counter!("logxy_response_body_bytes_total").increment(resp.body_bytes)
        }
        None => metrics::counter!("logxy_upstream_errors_total").increment(1),
    }
}
