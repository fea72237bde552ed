//! Infrastructure services

mod classification_service;

pub use classification_service::{Classification, ClassificationService, UpdateSettingsRequest};
