//! Parchive Observability
//!
//! Prometheus metrics for the realtime filler, the `/metrics` HTTP route, and
//! the logging setup shared by binaries and tests.
//!
//! # Usage
//!
//! ```no_run
//! use parchive_observability::{exporter, metrics};
//!
//! parchive_observability::init_tracing();
//! metrics::init();
//!
//! let metrics_router = exporter::create_metrics_router();
//! ```

pub mod exporter;
pub mod metrics;

pub use metrics::{init as init_metrics, REGISTRY};

/// Initialize all observability components
pub fn init() {
    metrics::init();
}

/// Install the global `tracing` subscriber.
///
/// Filters come from `RUST_LOG` and default to `info`. Set
/// `PARCHIVE_LOG_FORMAT=json` for one JSON object per line. Calling this more
/// than once keeps the first subscriber.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("PARCHIVE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
