//! Loads Keras HDF5 uploads into [`ModelHandle`]s

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::config::ModelSpec;
use super::error::KerasError;
use super::layers::{build_compatible_flatten, LayerRegistry};
use super::model::KerasModel;
use super::weights::WeightStore;
use crate::domain::classifier::{has_extension, Classifier, ModelHandle, ModelLoader, MODEL_EXTENSIONS};
use crate::domain::DomainError;
use crate::infrastructure::hdf5::Hdf5File;

const WEIGHTS_GROUP: &str = "model_weights";

/// Keras HDF5 model loader.
///
/// Uploaded bytes are written to a temporary `.h5` file, which is removed
/// once the attempt finishes, whether it succeeded or not.
#[derive(Debug, Clone)]
pub struct KerasH5Loader {
    registry: LayerRegistry,
    temp_dir: Option<PathBuf>,
}

impl KerasH5Loader {
    /// Standard layers with `Flatten` resolved to the compatible flatten
    pub fn new() -> Self {
        let mut registry = LayerRegistry::standard();
        registry.register("Flatten", build_compatible_flatten);
        Self::with_registry(registry)
    }

    pub fn with_registry(registry: LayerRegistry) -> Self {
        Self {
            registry,
            temp_dir: None,
        }
    }

    /// Create temporary files in `dir` instead of the system temp dir
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    fn write_temp(&self, bytes: &[u8]) -> Result<NamedTempFile, KerasError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("model-").suffix(".h5");

        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;

        debug!(path = %file.path().display(), size = bytes.len(), "Wrote temporary model file");
        Ok(file)
    }

    fn load_model(&self, bytes: &[u8]) -> Result<KerasModel, KerasError> {
        let temp = self.write_temp(bytes)?;
        let file = Hdf5File::open(temp.path())?;
        // the container is in memory now
        drop(temp);

        let root = file.root()?;
        let keras_major = match root.attribute("keras_version")? {
            Some(attribute) => major_version(&attribute.read_string()?),
            None => 2,
        };

        let config = root
            .attribute("model_config")?
            .ok_or_else(|| {
                KerasError::config("file has no model_config attribute (weights-only files cannot be loaded)")
            })?
            .read_string()?;

        let spec = ModelSpec::parse(&config, keras_major)?;
        let weights = WeightStore::new(root.group(WEIGHTS_GROUP)?)?;

        KerasModel::build(&spec, &weights, &self.registry)
    }
}

impl Default for KerasH5Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLoader for KerasH5Loader {
    fn load(&self, file_name: &str, bytes: &[u8]) -> Result<ModelHandle, DomainError> {
        if !has_extension(file_name, MODEL_EXTENSIONS) {
            return Err(DomainError::model_load(format!(
                "'{}' is not a .h5 or .hdf5 model file",
                file_name
            )));
        }

        let started = Instant::now();
        let model = self.load_model(bytes).map_err(|e| {
            warn!(file = file_name, error = %e, "Failed to load model");
            DomainError::model_load(e.to_string())
        })?;

        info!(
            file = file_name,
            model = model.name(),
            input_shape = %model.input_shape(),
            output_shape = %model.output_shape(),
            params = model.param_count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Loaded Keras model"
        );

        Ok(ModelHandle::new(Arc::new(model), file_name))
    }
}

/// `"2.15.0"` -> 2; unparseable versions count as Keras 2
fn major_version(version: &str) -> u8 {
    version
        .trim()
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .unwrap_or(2)
}
