//! Loaded classifier handle and its metadata

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::{Array2, Array4};
use serde::Serialize;

use super::shape::{format_dims, TensorShape};
use crate::domain::DomainError;

/// A callable image classifier
pub trait Classifier: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn input_shape(&self) -> &TensorShape;

    fn output_shape(&self) -> &TensorShape;

    fn param_count(&self) -> usize;

    fn summary(&self) -> Vec<LayerSummary>;

    /// Forward pass in inference mode; returns `(batch, classes)`
    fn predict(&self, input: &Array4<f32>) -> Result<Array2<f32>, DomainError>;
}

/// One row of a model summary table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub kind: String,
    pub output_shape: TensorShape,
    pub param_count: usize,
}

/// Metadata shown after a successful load
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub file_name: String,
    pub input_shape: TensorShape,
    pub output_shape: TensorShape,
    pub param_count: usize,
    pub layers: Vec<LayerSummary>,
    pub loaded_at: DateTime<Utc>,
}

impl ModelInfo {
    /// Number of classes the model scores, when statically known
    pub fn num_outputs(&self) -> Option<usize> {
        self.output_shape.last()
    }

    /// Plain-text summary table in the familiar Keras layout
    pub fn summary_text(&self) -> String {
        let rows: Vec<(String, String, String)> = self
            .layers
            .iter()
            .map(|layer| {
                (
                    format!("{} ({})", layer.name, layer.kind),
                    layer.output_shape.to_string(),
                    layer.param_count.to_string(),
                )
            })
            .collect();

        let headers = ("Layer (type)", "Output Shape", "Param #");
        let first = rows.iter().map(|r| r.0.len()).max().unwrap_or(0).max(headers.0.len());
        let second = rows.iter().map(|r| r.1.len()).max().unwrap_or(0).max(headers.1.len());
        let width = first + second + 14;

        let mut out = format!("Model: \"{}\"\n", self.name);
        out.push_str(&"_".repeat(width));
        out.push('\n');
        out.push_str(&format!(
            "{:<first$}  {:<second$}  {}\n",
            headers.0, headers.1, headers.2
        ));
        out.push_str(&"=".repeat(width));
        out.push('\n');

        for (name, shape, params) in &rows {
            out.push_str(&format!("{:<first$}  {:<second$}  {}\n", name, shape, params));
        }

        out.push_str(&"=".repeat(width));
        out.push('\n');
        out.push_str(&format!("Total params: {}\n", self.param_count));
        out
    }
}

/// Shared handle to a loaded model; replaced wholesale, never mutated
#[derive(Debug, Clone)]
pub struct ModelHandle {
    classifier: Arc<dyn Classifier>,
    info: ModelInfo,
}

impl ModelHandle {
    pub fn new(classifier: Arc<dyn Classifier>, file_name: impl Into<String>) -> Self {
        let info = ModelInfo {
            name: classifier.name().to_string(),
            file_name: file_name.into(),
            input_shape: classifier.input_shape().clone(),
            output_shape: classifier.output_shape().clone(),
            param_count: classifier.param_count(),
            layers: classifier.summary(),
            loaded_at: Utc::now(),
        };

        Self { classifier, info }
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Run one preprocessed image and return its probability vector
    pub fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, DomainError> {
        if !self.info.input_shape.accepts(input.shape()) {
            return Err(DomainError::inference(format!(
                "Input tensor shape {} does not match the model input shape {}",
                format_dims(input.shape()),
                self.info.input_shape
            )));
        }

        let output = self.classifier.predict(input)?;

        if output.nrows() != 1 {
            return Err(DomainError::inference(format!(
                "Expected a single output row, got shape {}",
                format_dims(output.shape())
            )));
        }

        Ok(output.row(0).to_vec())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Classifier that ignores its input and returns fixed scores
    #[derive(Debug)]
    pub struct FixedClassifier {
        pub input_shape: TensorShape,
        pub output_shape: TensorShape,
        pub scores: Vec<f32>,
    }

    impl FixedClassifier {
        pub fn new(input: &[usize], scores: Vec<f32>) -> Self {
            Self {
                input_shape: TensorShape::batched(input),
                output_shape: TensorShape::batched(&[scores.len()]),
                scores,
            }
        }

        pub fn handle(self) -> ModelHandle {
            ModelHandle::new(Arc::new(self), "fixed.h5")
        }
    }

    impl Classifier for FixedClassifier {
        fn name(&self) -> &str {
            "fixed"
        }

        fn input_shape(&self) -> &TensorShape {
            &self.input_shape
        }

        fn output_shape(&self) -> &TensorShape {
            &self.output_shape
        }

        fn param_count(&self) -> usize {
            0
        }

        fn summary(&self) -> Vec<LayerSummary> {
            vec![LayerSummary {
                name: "scores".to_string(),
                kind: "Constant".to_string(),
                output_shape: self.output_shape.clone(),
                param_count: 0,
            }]
        }

        fn predict(&self, input: &Array4<f32>) -> Result<Array2<f32>, DomainError> {
            let batch = input.shape()[0];
            Ok(Array2::from_shape_fn((batch, self.scores.len()), |(_, j)| {
                self.scores[j]
            }))
        }
    }
}
