//! Classification service - session workflow behind the UI and HTTP handlers

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::classifier::validate_model_file_name;
use crate::domain::prediction::to_csv;
use crate::domain::preprocessing::{decode_image, preprocess, validate_image_file_name, ImageInfo};
use crate::domain::{
    ClassLabels, ClassificationReport, ColorMode, DomainError, ImageSize, ModelInfo, ModelLoader,
    PreprocessingConfig, SessionId, SessionRepository, SessionSnapshot, SharedSession,
};
use crate::infrastructure::observability::{record_inference, record_model_load, set_active_sessions};

/// Result of classifying one uploaded image
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    #[serde(flatten)]
    pub report: ClassificationReport,
    pub image: ImageInfo,
    pub preprocessing: PreprocessingConfig,
}

/// Request to change a session's preprocessing settings
#[derive(Debug, Clone, Default)]
pub struct UpdateSettingsRequest {
    pub image_size: Option<u32>,
    pub color_mode: Option<String>,
}

/// Drives sessions through upload, configuration and classification
#[derive(Debug, Clone)]
pub struct ClassificationService {
    sessions: Arc<dyn SessionRepository>,
    loader: Arc<dyn ModelLoader>,
}

impl ClassificationService {
    pub fn new(sessions: Arc<dyn SessionRepository>, loader: Arc<dyn ModelLoader>) -> Self {
        Self { sessions, loader }
    }

    /// Create a session with default labels and settings
    pub async fn create_session(&self) -> Result<SessionSnapshot, DomainError> {
        let session = self.sessions.create().await?;
        let snapshot = session.lock().await.snapshot();

        self.publish_session_count().await;
        info!(session_id = %snapshot.id, "Session created");

        Ok(snapshot)
    }

    pub async fn snapshot(&self, id: &str) -> Result<SessionSnapshot, DomainError> {
        let session = self.session(id).await?;
        let snapshot = session.lock().await.snapshot();
        Ok(snapshot)
    }

    /// End a session and drop its model
    pub async fn end_session(&self, id: &str) -> Result<(), DomainError> {
        let session_id = SessionId::parse(id)?;

        if !self.sessions.delete(&session_id).await? {
            return Err(not_found(id));
        }

        self.publish_session_count().await;
        info!(session_id = %session_id, "Session ended");
        Ok(())
    }

    /// Number of live sessions, used by the readiness probe
    pub async fn session_count(&self) -> Result<u64, DomainError> {
        self.sessions.count().await
    }

    /// Maximum number of live sessions the store keeps
    pub fn session_capacity(&self) -> Option<u64> {
        self.sessions.capacity()
    }

    /// Load an uploaded model into the session.
    ///
    /// A failed load clears the loaded flag and records the error; the
    /// previous handle stays in place but is no longer used for inference.
    pub async fn upload_model(
        &self,
        id: &str,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<ModelInfo, DomainError> {
        validate_model_file_name(file_name)?;

        let session = self.session(id).await?;
        let mut context = session.lock().await;

        let started = Instant::now();
        let loader = self.loader.clone();
        let name = file_name.to_string();
        let size = bytes.len();

        let result = tokio::task::spawn_blocking(move || loader.load(&name, &bytes))
            .await
            .map_err(|e| DomainError::internal(format!("Model load task failed: {}", e)))
            .and_then(|loaded| loaded);

        record_model_load(result.is_ok(), started.elapsed());

        match result {
            Ok(handle) => {
                let model_info = handle.info().clone();
                context.replace_model(handle);

                info!(
                    session_id = %context.id(),
                    file_name = %file_name,
                    bytes = size,
                    input_shape = %model_info.input_shape,
                    output_shape = %model_info.output_shape,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Model loaded"
                );

                Ok(model_info)
            }
            Err(e) => {
                warn!(
                    session_id = %context.id(),
                    file_name = %file_name,
                    error = %e,
                    "Model load failed"
                );
                context.mark_load_failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Info and summary of the session's active model
    pub async fn model_info(&self, id: &str) -> Result<ModelInfo, DomainError> {
        let session = self.session(id).await?;
        let context = session.lock().await;
        Ok(context.active_model()?.info().clone())
    }

    /// Resize the label list and apply submitted names
    pub async fn update_labels(
        &self,
        id: &str,
        num_classes: usize,
        names: &[Option<String>],
    ) -> Result<ClassLabels, DomainError> {
        let session = self.session(id).await?;
        let mut context = session.lock().await;

        let labels = context.labels().edit(num_classes, names)?;
        context.set_labels(labels.clone());

        Ok(labels)
    }

    /// Change target size and/or colour mode; omitted fields keep their value
    pub async fn update_settings(
        &self,
        id: &str,
        request: UpdateSettingsRequest,
    ) -> Result<PreprocessingConfig, DomainError> {
        let session = self.session(id).await?;
        let mut context = session.lock().await;

        let mut settings = *context.preprocessing();
        if let Some(pixels) = request.image_size {
            settings.image_size = ImageSize::new(pixels)?;
        }
        if let Some(mode) = request.color_mode {
            settings.color_mode = mode.parse::<ColorMode>()?;
        }

        context.set_preprocessing(settings);
        Ok(settings)
    }

    /// Decode, preprocess and classify one image with the session's model
    pub async fn classify(
        &self,
        id: &str,
        file_name: Option<&str>,
        bytes: Bytes,
    ) -> Result<Classification, DomainError> {
        if let Some(name) = file_name {
            validate_image_file_name(name)?;
        }

        let session = self.session(id).await?;
        let context = session.lock().await;

        let model = context.active_model()?.clone();
        let labels = context.labels().clone();
        let settings = *context.preprocessing();

        if let Some(outputs) = model.info().num_outputs() {
            if outputs != labels.len() {
                return Err(DomainError::label_mismatch(labels.len(), outputs));
            }
        }

        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            let (image, image_info) = decode_image(&bytes)?;
            let tensor = preprocess(&image, &settings);
            let probabilities = model.predict(&tensor)?;
            Ok::<_, DomainError>((probabilities, image_info))
        })
        .await
        .map_err(|e| DomainError::internal(format!("Inference task failed: {}", e)))
        .and_then(|outcome| outcome)
        .and_then(|(probabilities, image)| {
            ClassificationReport::build(&probabilities, &labels).map(|report| Classification {
                report,
                image,
                preprocessing: settings,
            })
        });

        record_inference(result.is_ok(), started.elapsed());

        match &result {
            Ok(classification) => info!(
                session_id = %context.id(),
                predicted = %classification.report.predicted_label,
                confidence = %classification.report.confidence_display,
                duration_ms = started.elapsed().as_millis() as u64,
                "Image classified"
            ),
            Err(e) => warn!(session_id = %context.id(), error = %e, "Classification failed"),
        }

        result
    }

    /// Classify an image and render the ranking as CSV
    pub async fn classify_csv(
        &self,
        id: &str,
        file_name: Option<&str>,
        bytes: Bytes,
    ) -> Result<String, DomainError> {
        let classification = self.classify(id, file_name, bytes).await?;
        to_csv(&classification.report)
    }

    async fn session(&self, id: &str) -> Result<SharedSession, DomainError> {
        let session_id = SessionId::parse(id)?;
        self.sessions
            .get(&session_id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    async fn publish_session_count(&self) {
        match self.sessions.count().await {
            Ok(count) => set_active_sessions(count),
            Err(e) => warn!(error = %e, "Failed to count sessions"),
        }
    }
}

fn not_found(id: &str) -> DomainError {
    DomainError::not_found(format!("Session '{}' not found", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classifier::testing::FixedClassifier;
    use crate::domain::preprocessing::testing::encoded_rgb;
    use crate::domain::ModelHandle;
    use crate::infrastructure::session::InMemorySessionRepository;
    use image::ImageFormat;

    /// Loader that hands out a fixed classifier, or fails on "corrupt" names
    #[derive(Debug)]
    struct StubLoader {
        input: Vec<usize>,
        scores: Vec<f32>,
    }

    impl ModelLoader for StubLoader {
        fn load(&self, file_name: &str, _bytes: &[u8]) -> Result<ModelHandle, DomainError> {
            if file_name.starts_with("corrupt") {
                return Err(DomainError::model_load("not an HDF5 file"));
            }
            Ok(FixedClassifier::new(&self.input, self.scores.clone()).handle())
        }
    }

    fn service(input: &[usize], scores: Vec<f32>) -> ClassificationService {
        ClassificationService::new(
            Arc::new(InMemorySessionRepository::new()),
            Arc::new(StubLoader {
                input: input.to_vec(),
                scores,
            }),
        )
    }

    fn five_class_service() -> ClassificationService {
        service(&[128, 128, 1], vec![0.1, 0.05, 0.6, 0.05, 0.2])
    }

    fn png() -> Bytes {
        Bytes::from(encoded_rgb(50, 80, ImageFormat::Png))
    }

    #[tokio::test]
    async fn test_create_session_defaults() {
        let service = five_class_service();
        let snapshot = service.create_session().await.unwrap();

        assert!(!snapshot.model_loaded);
        assert_eq!(snapshot.labels.len(), 5);
        assert_eq!(snapshot.preprocessing, PreprocessingConfig::default());
        assert_eq!(service.session_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_classify_end_to_end() {
        let service = five_class_service();
        let id = service.create_session().await.unwrap().id.to_string();

        let info = service
            .upload_model(&id, "model.h5", Bytes::from_static(b"weights"))
            .await
            .unwrap();
        assert_eq!(info.num_outputs(), Some(5));

        let result = service.classify(&id, Some("cat.png"), png()).await.unwrap();

        assert_eq!(result.report.predicted_label, "Class 2");
        assert_eq!(result.report.confidence_display, "60.00%");
        assert_eq!(result.image.width, 50);
        assert_eq!(result.image.height, 80);

        let csv = service.classify_csv(&id, None, png()).await.unwrap();
        assert_eq!(csv.lines().nth(1), Some("Class 2,0.6"));
    }

    #[tokio::test]
    async fn test_classify_without_model() {
        let service = five_class_service();
        let id = service.create_session().await.unwrap().id.to_string();

        let err = service.classify(&id, None, png()).await.unwrap_err();
        assert!(matches!(err, DomainError::ModelNotLoaded { .. }));
    }

    #[tokio::test]
    async fn test_failed_load_clears_loaded_flag() {
        let service = five_class_service();
        let id = service.create_session().await.unwrap().id.to_string();

        service
            .upload_model(&id, "model.h5", Bytes::from_static(b"ok"))
            .await
            .unwrap();
        let err = service
            .upload_model(&id, "corrupt.h5", Bytes::from_static(b"junk"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ModelLoad { .. }));

        let snapshot = service.snapshot(&id).await.unwrap();
        assert!(!snapshot.model_loaded);
        assert!(snapshot.last_error.unwrap().contains("not an HDF5 file"));

        let err = service.classify(&id, None, png()).await.unwrap_err();
        assert!(matches!(err, DomainError::ModelNotLoaded { .. }));
    }

    #[tokio::test]
    async fn test_upload_rejects_extension_without_touching_session() {
        let service = five_class_service();
        let id = service.create_session().await.unwrap().id.to_string();

        let err = service
            .upload_model(&id, "model.onnx", Bytes::from_static(b"ok"))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Validation { .. }));
        assert!(service.snapshot(&id).await.unwrap().last_error.is_none());
    }

    #[tokio::test]
    async fn test_label_mismatch_detected_before_inference() {
        let service = five_class_service();
        let id = service.create_session().await.unwrap().id.to_string();
        service
            .upload_model(&id, "model.h5", Bytes::from_static(b"ok"))
            .await
            .unwrap();
        service.update_labels(&id, 3, &[]).await.unwrap();

        let err = service.classify(&id, None, png()).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::LabelMismatch {
                labels: 3,
                outputs: 5
            }
        ));
    }

    #[tokio::test]
    async fn test_update_labels_shrinks_and_keeps_names() {
        let service = five_class_service();
        let id = service.create_session().await.unwrap().id.to_string();

        let names = vec![Some("cat".to_string()), Some("dog".to_string())];
        let labels = service.update_labels(&id, 3, &names).await.unwrap();

        assert_eq!(labels.as_slice(), ["cat", "dog", "Class 2"]);
        assert!(service.update_labels(&id, 1, &[]).await.is_err());
        assert_eq!(service.snapshot(&id).await.unwrap().labels.len(), 3);
    }

    #[tokio::test]
    async fn test_update_settings_changes_tensor_shape() {
        let service = service(&[224, 224, 3], vec![0.3, 0.7]);
        let id = service.create_session().await.unwrap().id.to_string();
        service.update_labels(&id, 2, &[]).await.unwrap();
        service
            .upload_model(&id, "model.h5", Bytes::from_static(b"ok"))
            .await
            .unwrap();

        // default 128 grayscale does not fit a 224 RGB model
        let err = service.classify(&id, None, png()).await.unwrap_err();
        assert!(matches!(err, DomainError::Inference { .. }));

        let settings = service
            .update_settings(
                &id,
                UpdateSettingsRequest {
                    image_size: Some(224),
                    color_mode: Some("rgb".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(settings.tensor_shape(), [1, 224, 224, 3]);

        let result = service.classify(&id, None, png()).await.unwrap();
        assert_eq!(result.report.predicted_label, "Class 1");
    }

    #[tokio::test]
    async fn test_update_settings_rejects_unsupported_size() {
        let service = five_class_service();
        let id = service.create_session().await.unwrap().id.to_string();

        let request = UpdateSettingsRequest {
            image_size: Some(300),
            color_mode: None,
        };
        let err = service.update_settings(&id, request).await.unwrap_err();

        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_undecodable_image_keeps_session_usable() {
        let service = five_class_service();
        let id = service.create_session().await.unwrap().id.to_string();
        service
            .upload_model(&id, "model.h5", Bytes::from_static(b"ok"))
            .await
            .unwrap();

        let err = service
            .classify(&id, Some("broken.png"), Bytes::from_static(b"not an image"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Inference { .. }));

        assert!(service.classify(&id, None, png()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_and_invalid_session_ids() {
        let service = five_class_service();

        let err = service
            .snapshot(&SessionId::generate().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));

        let err = service.snapshot("abc").await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidId { .. }));
    }

    #[tokio::test]
    async fn test_end_session() {
        let service = five_class_service();
        let id = service.create_session().await.unwrap().id.to_string();

        service.end_session(&id).await.unwrap();

        assert!(matches!(
            service.end_session(&id).await.unwrap_err(),
            DomainError::NotFound { .. }
        ));
        assert_eq!(service.session_count().await.unwrap(), 0);
    }
}
