use axum::middleware;
use axum::response::Redirect;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use super::health;
use super::middleware::{logging_middleware, metrics_middleware};
use super::state::AppState;
use super::v1;
use crate::config::UiConfig;
use crate::infrastructure::observability::{create_metrics_router, PrometheusMetrics};

/// Prometheus exporter and the path it is served on
pub struct MetricsEndpoint {
    pub metrics: PrometheusMetrics,
    pub path: String,
}

/// Create the full router: probes, session API, UI and metrics
pub fn create_router(
    state: AppState,
    ui: &UiConfig,
    metrics: Option<MetricsEndpoint>,
) -> Router {
    let mut router = Router::new()
        // Health endpoints
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/live", get(health::live_check))
        .nest("/v1", v1::create_v1_router(&state.limits));

    if ui.enabled {
        let index = ui.static_dir.join("index.html");
        router = router
            .nest_service(
                "/ui",
                ServeDir::new(&ui.static_dir).fallback(ServeFile::new(index)),
            )
            .route("/", get(|| async { Redirect::temporary("/ui/") }));
    }

    let mut router = router
        .with_state(state)
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive());

    if let Some(endpoint) = metrics {
        router = router.merge(create_metrics_router(endpoint.metrics, &endpoint.path));
    }

    router
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use image::ImageFormat;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::LimitsConfig;
    use crate::domain::classifier::testing::FixedClassifier;
    use crate::domain::preprocessing::testing::encoded_rgb;
    use crate::domain::{DomainError, ModelHandle, ModelLoader};
    use crate::infrastructure::session::{InMemorySessionConfig, InMemorySessionRepository};

    const BOUNDARY: &str = "studio-test-boundary";

    #[derive(Debug)]
    struct StubLoader;

    impl ModelLoader for StubLoader {
        fn load(&self, file_name: &str, bytes: &[u8]) -> Result<ModelHandle, DomainError> {
            if bytes.starts_with(b"junk") {
                return Err(DomainError::model_load(format!(
                    "'{}' is not a valid HDF5 file",
                    file_name
                )));
            }
            Ok(FixedClassifier::new(&[128, 128, 1], vec![0.1, 0.05, 0.6, 0.05, 0.2]).handle())
        }
    }

    fn app() -> Router {
        app_with_limits(LimitsConfig::default())
    }

    fn app_with_limits(limits: LimitsConfig) -> Router {
        app_with_sessions(InMemorySessionRepository::new(), limits)
    }

    fn app_with_sessions(sessions: InMemorySessionRepository, limits: LimitsConfig) -> Router {
        let state = AppState::from_parts(Arc::new(sessions), Arc::new(StubLoader), limits);
        let ui = UiConfig {
            enabled: false,
            ..UiConfig::default()
        };
        create_router(state, &ui, None)
    }

    fn multipart_body(field: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        write!(
            body,
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .unwrap();
        body.extend_from_slice(content);
        write!(body, "\r\n--{BOUNDARY}--\r\n").unwrap();
        body
    }

    fn upload(uri: &str, field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(field, file_name, content)))
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create_session(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(json_request("POST", "/v1/sessions", Value::Null))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        body_json(response).await["id"].as_str().unwrap().to_string()
    }

    async fn load_model(app: &Router, id: &str) {
        let response = app
            .clone()
            .oneshot(upload(
                &format!("/v1/sessions/{id}/model"),
                "model",
                "model.h5",
                b"weights",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let app = app();

        let response = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get("/live")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["checks"][0]["name"], "session_store");
    }

    #[tokio::test]
    async fn test_ready_degrades_near_session_capacity() {
        let sessions = InMemorySessionRepository::with_config(
            InMemorySessionConfig::default().with_max_capacity(10),
        );
        let app = app_with_sessions(sessions, LimitsConfig::default());

        let response = app.clone().oneshot(get("/ready")).await.unwrap();
        assert_eq!(body_json(response).await["status"], "healthy");

        for _ in 0..9 {
            create_session(&app).await;
        }

        let response = app.oneshot(get("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["checks"][0]["message"], "9 of 10 sessions in use");
    }

    #[tokio::test]
    async fn test_request_id_is_returned() {
        let response = app().oneshot(get("/health")).await.unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_session_defaults() {
        let app = app();
        let id = create_session(&app).await;

        let response = app
            .oneshot(get(&format!("/v1/sessions/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["model_loaded"], false);
        assert_eq!(json["labels"].as_array().unwrap().len(), 5);
        assert_eq!(json["labels"][0], "Class 0");
        assert_eq!(json["preprocessing"]["image_size"], 128);
        assert_eq!(json["preprocessing"]["color_mode"], "Grayscale");
    }

    #[tokio::test]
    async fn test_classify_and_export_csv() {
        let app = app();
        let id = create_session(&app).await;
        load_model(&app, &id).await;

        let image = encoded_rgb(50, 80, ImageFormat::Png);
        let response = app
            .clone()
            .oneshot(upload(
                &format!("/v1/sessions/{id}/predictions"),
                "image",
                "cat.png",
                &image,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["predicted_label"], "Class 2");
        assert_eq!(json["confidence_display"], "60.00%");
        assert_eq!(json["ranking"][0]["label"], "Class 2");
        assert_eq!(json["ranking"][1]["label"], "Class 4");
        assert_eq!(json["image"]["width"], 50);

        let response = app
            .oneshot(upload(
                &format!("/v1/sessions/{id}/predictions.csv"),
                "image",
                "cat.png",
                &image,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("predictions.csv"));

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Class,Probability"));
        assert_eq!(lines.next(), Some("Class 2,0.6"));

        // The UI writes its download from the JSON ranking it already shows
        let from_ranking: String = json["ranking"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| format!("{},{}\n", row["label"].as_str().unwrap(), row["probability"]))
            .collect();
        assert_eq!(csv, format!("Class,Probability\n{from_ranking}"));
    }

    #[tokio::test]
    async fn test_corrupt_model_is_reported() {
        let app = app();
        let id = create_session(&app).await;

        let response = app
            .clone()
            .oneshot(upload(
                &format!("/v1/sessions/{id}/model"),
                "model",
                "model.h5",
                b"junk",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["error"]["type"], "model_load_error");

        let json = body_json(
            app.oneshot(get(&format!("/v1/sessions/{id}")))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(json["model_loaded"], false);
        assert!(json["last_error"].as_str().unwrap().contains("not a valid HDF5"));
    }

    #[tokio::test]
    async fn test_model_upload_rejects_extension() {
        let app = app();
        let id = create_session(&app).await;

        let response = app
            .oneshot(upload(
                &format!("/v1/sessions/{id}/model"),
                "model",
                "model.pt",
                b"weights",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_multipart_field() {
        let app = app();
        let id = create_session(&app).await;

        let response = app
            .oneshot(upload(
                &format!("/v1/sessions/{id}/model"),
                "file",
                "model.h5",
                b"weights",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "missing_field");
        assert_eq!(json["error"]["param"], "model");
    }

    #[tokio::test]
    async fn test_classify_without_model_conflicts() {
        let app = app();
        let id = create_session(&app).await;

        let response = app
            .oneshot(upload(
                &format!("/v1/sessions/{id}/predictions"),
                "image",
                "cat.png",
                &encoded_rgb(8, 8, ImageFormat::Png),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"]["code"], "model_not_loaded");
    }

    #[tokio::test]
    async fn test_undecodable_image_reports_details() {
        let app = app();
        let id = create_session(&app).await;
        load_model(&app, &id).await;

        let response = app
            .oneshot(upload(
                &format!("/v1/sessions/{id}/predictions"),
                "image",
                "cat.png",
                b"definitely not a png",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "inference_error");
        assert!(!json["error"]["details"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_label_editor_and_mismatch() {
        let app = app();
        let id = create_session(&app).await;
        load_model(&app, &id).await;

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/v1/sessions/{id}/labels"),
                serde_json::json!({"num_classes": 3, "names": ["cat", "dog"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["labels"],
            serde_json::json!(["cat", "dog", "Class 2"])
        );

        let response = app
            .oneshot(upload(
                &format!("/v1/sessions/{id}/predictions"),
                "image",
                "cat.png",
                &encoded_rgb(8, 8, ImageFormat::Png),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["error"]["type"], "label_mismatch");
    }

    #[tokio::test]
    async fn test_invalid_class_count() {
        let app = app();
        let id = create_session(&app).await;

        let response = app
            .oneshot(json_request(
                "PUT",
                &format!("/v1/sessions/{id}/labels"),
                serde_json::json!({"num_classes": 101}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_settings() {
        let app = app();
        let id = create_session(&app).await;

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/v1/sessions/{id}/settings"),
                serde_json::json!({"image_size": 224, "color_mode": "RGB"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["image_size"], 224);
        assert_eq!(json["color_mode"], "RGB");

        let response = app
            .oneshot(json_request(
                "PUT",
                &format!("/v1/sessions/{id}/settings"),
                serde_json::json!({"image_size": 100}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_session() {
        let app = app();

        let response = app
            .clone()
            .oneshot(get(&format!("/v1/sessions/{}", uuid::Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(get("/v1/sessions/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "invalid_id");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let app = app();
        let id = create_session(&app).await;

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/v1/sessions/{id}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(get(&format!("/v1/sessions/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_image_over_limit() {
        let app = app_with_limits(LimitsConfig {
            max_model_bytes: 1024,
            max_image_bytes: 16,
        });
        let id = create_session(&app).await;

        let response = app
            .oneshot(upload(
                &format!("/v1/sessions/{id}/predictions"),
                "image",
                "cat.png",
                &[0u8; 64],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
