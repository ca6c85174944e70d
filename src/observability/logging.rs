//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber
//! - Pick the output format (pretty for development, JSON for production)
//! - Resolve the log filter from `RUST_LOG`, falling back to config
//! - Bridge spans to OpenTelemetry through the global tracer provider
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - If a subscriber is already installed it is kept and `false` returned
//! - Until the application sets a global tracer provider the OpenTelemetry
//!   layer only carries trace context; nothing is exported

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, ObservabilityConfig};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(level: &str) -> String {
    format!("rpc_shell={level},tower_http=info,{level}")
}

/// Install the global subscriber. Returns `true` if this call installed it.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.log_level)));

    let otel = tracing_opentelemetry::layer().with_tracer(opentelemetry::global::tracer("rpc-shell"));
    let registry = tracing_subscriber::registry().with(filter).with(otel);
    let installed = match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };

    installed.is_ok()
}
