//! Command line interface
//!
//! - `serve`: HTTP API and browser UI
//! - `predict`: classify one image offline
//! - `inspect`: print a model's summary

pub mod inspect;
pub mod predict;
pub mod serve;

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::domain::{ModelHandle, ModelLoader};
use crate::infrastructure::keras::KerasH5Loader;
use crate::infrastructure::logging;

/// Image Classifier Studio - classify images with a Keras HDF5 model
#[derive(Parser)]
#[command(name = "image-classifier-studio")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP API with the browser UI
    Serve(serve::ServeArgs),

    /// Classify one image and print the ranked classes
    Predict(predict::PredictArgs),

    /// Print model metadata and layer summary
    Inspect(inspect::InspectArgs),
}

/// Load `.env` and configuration files, then install logging
fn bootstrap() -> AppConfig {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging);
    config
}

/// Read and load a model file from disk
async fn load_model_file(path: &Path) -> anyhow::Result<ModelHandle> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read model file {}", path.display()))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let handle = tokio::task::spawn_blocking(move || KerasH5Loader::new().load(&file_name, &bytes))
        .await??;

    Ok(handle)
}
