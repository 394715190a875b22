use crate::Result;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub const HEALTHZ_PATH: &str = "/healthz";
pub const READYZ_PATH: &str = "/readyz";

#[derive(Clone)]
struct ExporterState {
    registry: Registry,
    ready: Arc<AtomicBool>,
}

/// Serves the registry in the Prometheus text format, plus health probes
pub struct PrometheusExporter {
    registry: Registry,
    port: u16,
    metrics_path: String,
    ready: Arc<AtomicBool>,
}

impl PrometheusExporter {
    pub fn new(registry: Registry, port: u16, metrics_path: impl Into<String>) -> Self {
        Self {
            registry,
            port,
            metrics_path: metrics_path.into(),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag flipped once caches are synced; `/readyz` reports it
    pub fn readiness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    pub fn router(&self) -> Router {
        let state = ExporterState {
            registry: self.registry.clone(),
            ready: Arc::clone(&self.ready),
        };

        Router::new()
            .route(&self.metrics_path, get(metrics_handler))
            .route(HEALTHZ_PATH, get(healthz_handler))
            .route(READYZ_PATH, get(readyz_handler))
            .with_state(state)
    }

    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await?;

        info!("Serving metrics on http://{}{}", addr, self.metrics_path);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        info!("Metrics server stopped");
        Ok(())
    }
}

pub fn format_metrics(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

async fn metrics_handler(State(state): State<ExporterState>) -> impl IntoResponse {
    match format_metrics(&state.registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        ),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<ExporterState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{GaugeVec, Opts};

    #[test]
    fn test_format_metrics_omits_unset_series() {
        let registry = Registry::new();
        let gauge = GaugeVec::new(Opts::new("backupmonitor_missing", "help"), &["namespace"]).unwrap();
        registry.register(Box::new(gauge.clone())).unwrap();

        gauge.with_label_values(&["ns1"]).set(1.0);
        let text = format_metrics(&registry).unwrap();
        assert!(text.contains(r#"backupmonitor_missing{namespace="ns1"} 1"#));

        gauge.remove_label_values(&["ns1"]).unwrap();
        let text = format_metrics(&registry).unwrap();
        assert!(!text.contains("ns1"));
    }

    #[tokio::test]
    async fn test_readiness_probe() {
        let exporter = PrometheusExporter::new(Registry::new(), 0, "/metrics");
        let state = ExporterState {
            registry: Registry::new(),
            ready: exporter.readiness(),
        };

        let resp = readyz_handler(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        exporter.readiness().store(true, Ordering::Relaxed);
        let resp = readyz_handler(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
