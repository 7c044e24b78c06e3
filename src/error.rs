use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlyerError {
    /// A required credential is missing. Raised before any network call.
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Transport(String),

    /// The recognition service answered but found nothing to read.
    #[error("No text detected in image")]
    NoTextDetected,

    #[error("Failed to initialize: {0}")]
    Initialization(String),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Image too large: {size} bytes (max: {max} bytes)")]
    ImageTooLarge { size: usize, max: usize },

    /// The request body exceeded the server's body limit.
    #[error("Request body too large (limit: {limit} bytes)")]
    BodyTooLarge { limit: usize },

    #[error("Missing file in request")]
    MissingFile,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl FlyerError {
    pub fn code(&self) -> &'static str {
        match self {
            FlyerError::Configuration(_) => "CONFIGURATION_ERROR",
            FlyerError::Transport(_) => "TRANSPORT_ERROR",
            FlyerError::NoTextDetected => "NO_TEXT_DETECTED",
            FlyerError::Initialization(_) => "INIT_ERROR",
            FlyerError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            FlyerError::ImageTooLarge { .. } => "IMAGE_TOO_LARGE",
            FlyerError::BodyTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            FlyerError::MissingFile => "MISSING_FILE",
            FlyerError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}

impl From<reqwest::Error> for FlyerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FlyerError::Transport("Request timed out".to_string())
        } else {
            // The URL may carry the API key as a query parameter.
            FlyerError::Transport(format!("Request failed: {}", err.without_url()))
        }
    }
}

impl FlyerError {
    /// Classify a multipart read failure, keeping body-limit hits distinct.
    pub fn from_multipart(err: MultipartError, limit: usize, context: &str) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            FlyerError::BodyTooLarge { limit }
        } else {
            FlyerError::InvalidRequest(format!("{}: {}", context, err.body_text()))
        }
    }

    /// Classify a JSON extractor rejection.
    pub fn from_json_rejection(rejection: JsonRejection, limit: usize) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            FlyerError::BodyTooLarge { limit }
        } else {
            FlyerError::InvalidRequest(rejection.body_text())
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for FlyerError {
    fn into_response(self) -> Response {
        let status = match &self {
            FlyerError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            FlyerError::ImageTooLarge { .. } | FlyerError::BodyTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            FlyerError::MissingFile | FlyerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            FlyerError::Transport(_) => StatusCode::BAD_GATEWAY,
            FlyerError::Configuration(_)
            | FlyerError::NoTextDetected
            | FlyerError::Initialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}
