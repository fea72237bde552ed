//! Session endpoint handlers

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::state::AppState;
use crate::api::types::{ApiError, Json, Upload};
use crate::domain::prediction::{CSV_CONTENT_TYPE, CSV_FILE_NAME};
use crate::domain::{ClassLabels, ModelInfo, PreprocessingConfig, SessionSnapshot};
use crate::infrastructure::services::{Classification, UpdateSettingsRequest};

/// Form field carrying the model file
pub const MODEL_FIELD: &str = "model";
/// Form field carrying the image file
pub const IMAGE_FIELD: &str = "image";

/// Loaded model metadata plus its printable summary
#[derive(Debug, Serialize)]
pub struct ModelResponse {
    #[serde(flatten)]
    pub info: ModelInfo,
    pub summary: String,
}

impl From<ModelInfo> for ModelResponse {
    fn from(info: ModelInfo) -> Self {
        let summary = info.summary_text();
        Self { info, summary }
    }
}

/// Body of the label editor's update action
#[derive(Debug, Deserialize)]
pub struct UpdateLabelsRequest {
    pub num_classes: usize,
    #[serde(default)]
    pub names: Vec<Option<String>>,
}

#[derive(Debug, Serialize)]
pub struct LabelsResponse {
    pub labels: ClassLabels,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsBody {
    pub image_size: Option<u32>,
    pub color_mode: Option<String>,
}

/// POST /v1/sessions
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    let snapshot = state.classification_service.create_session().await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /v1/sessions/:session_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let snapshot = state.classification_service.snapshot(&session_id).await?;
    Ok(Json(snapshot))
}

/// DELETE /v1/sessions/:session_id
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.classification_service.end_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/sessions/:session_id/model
pub async fn upload_model(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<ModelResponse>, ApiError> {
    let upload = Upload::from_field(&mut multipart, MODEL_FIELD).await?;

    if upload.bytes.len() > state.limits.max_model_bytes {
        return Err(ApiError::payload_too_large(format!(
            "Model file exceeds the {} byte limit",
            state.limits.max_model_bytes
        )));
    }

    debug!(
        session_id = %session_id,
        file_name = %upload.display_name(),
        bytes = upload.bytes.len(),
        "Uploading model"
    );

    let info = state
        .classification_service
        .upload_model(&session_id, upload.display_name(), upload.bytes.clone())
        .await?;

    Ok(Json(info.into()))
}

/// GET /v1/sessions/:session_id/model
pub async fn get_model(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ModelResponse>, ApiError> {
    let info = state.classification_service.model_info(&session_id).await?;
    Ok(Json(info.into()))
}

/// PUT /v1/sessions/:session_id/labels
pub async fn update_labels(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<UpdateLabelsRequest>,
) -> Result<Json<LabelsResponse>, ApiError> {
    let labels = state
        .classification_service
        .update_labels(&session_id, request.num_classes, &request.names)
        .await?;

    Ok(Json(LabelsResponse { labels }))
}

/// PUT /v1/sessions/:session_id/settings
pub async fn update_settings(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<UpdateSettingsBody>,
) -> Result<Json<PreprocessingConfig>, ApiError> {
    let request = UpdateSettingsRequest {
        image_size: body.image_size,
        color_mode: body.color_mode,
    };

    let settings = state
        .classification_service
        .update_settings(&session_id, request)
        .await?;

    Ok(Json(settings))
}

/// POST /v1/sessions/:session_id/predictions
pub async fn classify(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Classification>, ApiError> {
    let upload = read_image(&state, &mut multipart).await?;

    let classification = state
        .classification_service
        .classify(&session_id, upload.file_name.as_deref(), upload.bytes)
        .await?;

    Ok(Json(classification))
}

/// POST /v1/sessions/:session_id/predictions.csv
pub async fn classify_csv(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let upload = read_image(&state, &mut multipart).await?;

    let csv = state
        .classification_service
        .classify_csv(&session_id, upload.file_name.as_deref(), upload.bytes)
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, CSV_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", CSV_FILE_NAME),
            ),
        ],
        csv,
    ))
}

async fn read_image(state: &AppState, multipart: &mut Multipart) -> Result<Upload, ApiError> {
    let upload = Upload::from_field(multipart, IMAGE_FIELD).await?;

    if upload.bytes.len() > state.limits.max_image_bytes {
        return Err(ApiError::payload_too_large(format!(
            "Image file exceeds the {} byte limit",
            state.limits.max_image_bytes
        )));
    }

    Ok(upload)
}
