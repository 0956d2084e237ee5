use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use slipscan_ocr::PipelineError;

/// Failures reported to HTTP clients. Bodies are plain text.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unable to process the form")]
    Form,
    #[error("No file uploaded")]
    NoFile,
    #[error("Invalid file format")]
    InvalidFormat,
    #[error("File too large")]
    TooLarge,
    #[error("Failed to save file")]
    Storage,
    #[error("Failed to extract text")]
    Extraction,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Form | ApiError::NoFile | ApiError::InvalidFormat | ApiError::TooLarge => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Storage | ApiError::Extraction => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UnsupportedFormat(_) => ApiError::InvalidFormat,
            PipelineError::TooLarge { .. } => ApiError::TooLarge,
            PipelineError::Io(_) => ApiError::Storage,
            PipelineError::Preprocess(_) | PipelineError::Ocr(_) => ApiError::Extraction,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
