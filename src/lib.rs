//! Image Classifier Studio
//!
//! Upload a Keras HDF5 model, name its classes, pick how images are
//! preprocessed and classify images from the browser or the command line.

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use api::state::AppState;
use infrastructure::keras::KerasH5Loader;
use infrastructure::session::InMemorySessionRepository;
use tracing::info;

/// Create the application state with default configuration
pub fn create_app_state() -> AppState {
    create_app_state_with_config(&AppConfig::default())
}

/// Create the application state from configuration
pub fn create_app_state_with_config(config: &AppConfig) -> AppState {
    let sessions = InMemorySessionRepository::with_config(config.session.store_config());
    let loader = KerasH5Loader::new();

    info!(
        max_sessions = config.session.max_sessions,
        time_to_idle_secs = config.session.time_to_idle_secs,
        "Session store initialized"
    );

    AppState::from_parts(Arc::new(sessions), Arc::new(loader), config.limits.clone())
}
