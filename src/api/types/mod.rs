//! Request and response types shared by the HTTP handlers

pub mod error;
pub mod json;
pub mod multipart;

pub use error::{ApiError, ApiErrorResponse, ApiErrorType};
pub use json::Json;
pub use multipart::Upload;
