//! HTTP endpoints for scraping and probing the filler
//!
//! - `/metrics` - Prometheus text exposition of [`REGISTRY`]
//! - `/health` - 200 while the process is up
//! - `/ready` - 200 while the readiness check passes, 503 otherwise (the
//!   filler binary reports not ready once shutdown has started)

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder, TEXT_FORMAT};

use crate::metrics::REGISTRY;

/// Answers whether the process should receive traffic
pub type ReadinessCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Render every registered metric in the text exposition format
pub fn encode_registry() -> prometheus::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

pub async fn metrics_handler() -> Response {
    match encode_registry() {
        Ok(body) => ([(CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {e}"),
        )
            .into_response(),
    }
}

pub async fn health_handler() -> &'static str {
    "ok"
}

async fn ready_handler(State(ready): State<ReadinessCheck>) -> Response {
    if ready() {
        "ready".into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

/// Router with all endpoints, `/ready` backed by `ready`
pub fn create_router(ready: ReadinessCheck) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(ready)
}

/// Router whose `/ready` always passes
pub fn create_metrics_router() -> Router {
    create_router(Arc::new(|| true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{init, ARCHIVE_WRITES_IN_FLIGHT};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt; // for `oneshot`

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        init();
        ARCHIVE_WRITES_IN_FLIGHT.set(0);

        let response = create_metrics_router()
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), TEXT_FORMAT);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("parchive_archive_writes_in_flight"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        assert_eq!(get_status(create_metrics_router(), "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_follows_check() {
        let stopping = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopping);
        let app = create_router(Arc::new(move || !flag.load(Ordering::SeqCst)));

        assert_eq!(get_status(app.clone(), "/ready").await, StatusCode::OK);

        stopping.store(true, Ordering::SeqCst);
        assert_eq!(
            get_status(app, "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
