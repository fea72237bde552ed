//! Versioned session API

pub mod sessions;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};

use super::state::AppState;
use crate::config::LimitsConfig;

/// Create v1 API router; upload routes get their own body limits
pub fn create_v1_router(limits: &LimitsConfig) -> Router<AppState> {
    // multipart framing on top of the file itself
    let slack = 64 * 1024;

    Router::new()
        .route("/sessions", post(sessions::create_session))
        .route(
            "/sessions/{session_id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route(
            "/sessions/{session_id}/model",
            post(sessions::upload_model)
                .layer(DefaultBodyLimit::max(limits.max_model_bytes + slack))
                .get(sessions::get_model),
        )
        .route("/sessions/{session_id}/labels", put(sessions::update_labels))
        .route(
            "/sessions/{session_id}/settings",
            put(sessions::update_settings),
        )
        .route(
            "/sessions/{session_id}/predictions",
            post(sessions::classify)
                .layer(DefaultBodyLimit::max(limits.max_image_bytes + slack)),
        )
        .route(
            "/sessions/{session_id}/predictions.csv",
            post(sessions::classify_csv)
                .layer(DefaultBodyLimit::max(limits.max_image_bytes + slack)),
        )
}
