//! File upload extraction from multipart forms

use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use bytes::Bytes;

use super::error::ApiError;

/// One uploaded file taken from a multipart form
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub bytes: Bytes,
}

impl Upload {
    /// Read the form until `field` is found; other fields are skipped.
    pub async fn from_field(multipart: &mut Multipart, field: &str) -> Result<Self, ApiError> {
        while let Some(part) = multipart.next_field().await.map_err(multipart_error)? {
            if part.name() != Some(field) {
                continue;
            }

            let file_name = part.file_name().map(str::to_string);
            let bytes = part.bytes().await.map_err(multipart_error)?;

            if bytes.is_empty() {
                return Err(ApiError::bad_request(format!("Uploaded file '{}' is empty", field))
                    .with_param(field)
                    .with_code("empty_upload"));
            }

            return Ok(Self { file_name, bytes });
        }

        Err(ApiError::bad_request(format!("Missing multipart field '{}'", field))
            .with_param(field)
            .with_code("missing_field"))
    }

    /// File name for messages and logs
    pub fn display_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or("upload")
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(format!("Upload too large: {}", err.body_text()))
    } else {
        ApiError::bad_request(format!("Failed to read multipart field: {}", err.body_text()))
    }
}
