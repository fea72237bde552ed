//! Prometheus metrics infrastructure

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use super::config::MetricsConfig;

/// Prometheus metrics handle for serving metrics endpoint
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Get the metrics as a string for the /metrics endpoint
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Initialize Prometheus metrics
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            register_default_metrics();

            tracing::info!("Prometheus metrics initialized at {}", config.path);

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

fn register_default_metrics() {
    gauge!("classifier_studio_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    gauge!("active_sessions").set(0.0);
}

/// Create the metrics router serving `path`
pub fn create_metrics_router(metrics: PrometheusMetrics, path: &str) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<PrometheusMetrics>) -> impl IntoResponse {
    metrics.render()
}

/// Record an HTTP request metric
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());

    // Track 5xx errors separately
    if status >= 500 {
        counter!("http_server_errors_total", &labels).increment(1);
    }
}

/// Record one model load attempt
pub fn record_model_load(success: bool, duration: Duration) {
    let outcome = outcome(success);

    counter!("model_loads_total", "outcome" => outcome).increment(1);
    histogram!("model_load_duration_seconds", "outcome" => outcome).record(duration.as_secs_f64());
}

/// Record one classification request
pub fn record_inference(success: bool, duration: Duration) {
    let outcome = outcome(success);

    counter!("inferences_total", "outcome" => outcome).increment(1);
    histogram!("inference_duration_seconds", "outcome" => outcome).record(duration.as_secs_f64());
}

pub fn set_active_sessions(count: u64) {
    gauge!("active_sessions").set(count as f64);
}

fn outcome(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

/// Sanitize URL path for metric labels (replace IDs, limit cardinality)
fn sanitize_path(path: &str) -> String {
    let path = path
        .split('/')
        .map(|segment| {
            let is_id = uuid::Uuid::parse_str(segment).is_ok()
                || (!segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()));
            if is_id { "{id}" } else { segment }
        })
        .collect::<Vec<_>>()
        .join("/");

    // Truncate long paths
    match path.char_indices().nth(50) {
        Some((end, _)) => path[..end].to_string(),
        None => path,
    }
}
