//! Metrics collection and exposition.
//!
//! # Metrics
//! - `rpc_server_handled_total` (counter): finished calls by method, code
//! - `rpc_server_handling_seconds` (histogram): call latency by method
//! - `rpc_server_registered_services` (gauge): descriptors currently
//!   registered with discovery
//!
//! # Design Decisions
//! - The exporter is optional; without it every update is a no-op
//! - Labels are the full method path and the status code name

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tonic::Code;

pub const HANDLED_TOTAL: &str = "rpc_server_handled_total";
pub const HANDLING_SECONDS: &str = "rpc_server_handling_seconds";
pub const REGISTERED_SERVICES: &str = "rpc_server_registered_services";

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "failed to install metrics exporter"),
    }
}

/// Record one finished call.
pub fn record_call(method: &str, code: Code, elapsed: Duration) {
    metrics::counter!(
        HANDLED_TOTAL,
        "method" => method.to_string(),
        "code" => format!("{code:?}")
    )
    .increment(1);
    metrics::histogram!(HANDLING_SECONDS, "method" => method.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn set_registered_services(count: usize) {
    metrics::gauge!(REGISTERED_SERVICES).set(count as f64);
}
