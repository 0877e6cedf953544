//! HTTP server for the metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::collector::Collector;
use crate::render::render;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    collectors: Arc<Vec<Arc<dyn Collector>>>,
}

/// Create the HTTP router.
///
/// `GET /metrics` is the only surface; everything else answers a plain-text
/// 404.
pub fn create_router(collectors: Vec<Arc<dyn Collector>>) -> Router {
    let state = AppState {
        collectors: Arc::new(collectors),
    };

    Router::new()
        .route("/metrics", get(metrics_handler))
        .fallback(not_found_handler)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the /metrics endpoint.
///
/// Always answers 200 with whatever metrics could be assembled; per-source
/// failures are isolated inside each collector.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let mut families = Vec::new();
    for collector in state.collectors.iter() {
        families.extend(collector.collect().await);
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        render(&families),
    )
        .into_response()
}

async fn not_found_handler() -> Response {
    (
        StatusCode::NOT_FOUND,
        [("content-type", "text/plain")],
        "404 Not Found\n",
    )
        .into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    collectors: Vec<Arc<dyn Collector>>,
    listen_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(collectors: Vec<Arc<dyn Collector>>, listen_addr: SocketAddr) -> Self {
        Self {
            collectors,
            listen_addr,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.collectors);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(addr = %self.listen_addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use iotsight_common::{ExpositionRecord, MetricFamily, MetricKind};
    use tower::ServiceExt;

    struct FakeCollector;

    #[async_trait]
    impl Collector for FakeCollector {
        fn source(&self) -> &'static str {
            "fake"
        }

        async fn collect(&self) -> Vec<MetricFamily> {
            let mut family =
                MetricFamily::new("fake_metric", MetricKind::Gauge, None, Some("A fake."));
            family.records.push(ExpositionRecord::new(
                vec![("sensor".to_string(), "1".to_string())],
                3.0,
                0,
            ));
            vec![family]
        }
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let router = create_router(vec![Arc::new(FakeCollector)]);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("# TYPE fake_metric gauge"));
        assert!(body.contains("fake_metric{sensor=\"1\"} 3.000000 0"));
        assert!(body.ends_with("# EOF\n"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let router = create_router(vec![Arc::new(FakeCollector)]);

        let response = router
            .oneshot(Request::get("/other").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"404 Not Found\n");
    }
}
