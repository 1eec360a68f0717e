//! Error types for the gallery service

use crate::types::UploadResponse;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use ephemeral_store::{IngestError, StoreError, ValidationError};
use std::fmt;

/// Startup and serving failures of the binary
#[derive(Debug)]
pub enum GalleryError {
    Store(StoreError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for GalleryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GalleryError::Store(err) => write!(f, "Store error: {}", err),
            GalleryError::Io(err) => write!(f, "IO error: {}", err),
            GalleryError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for GalleryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GalleryError::Store(err) => Some(err),
            GalleryError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<StoreError> for GalleryError {
    fn from(err: StoreError) -> Self {
        GalleryError::Store(err)
    }
}

impl From<std::io::Error> for GalleryError {
    fn from(err: std::io::Error) -> Self {
        GalleryError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for GalleryError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        GalleryError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GalleryError>;

/// Request error that converts to an HTTP response
///
/// Upload failures keep the `{success: false, error}` shape clients expect.
#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Multipart(MultipartError),
    NotFound,
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            AppError::Multipart(err) => (err.status(), err.body_text()),
            AppError::NotFound => (StatusCode::NOT_FOUND, "Nicht gefunden".to_string()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Interner Serverfehler".to_string(),
                )
            }
        };

        (status, Json(UploadResponse::failed(message))).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(err) => AppError::Validation(err),
            IngestError::Storage(err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::Multipart(err)
    }
}
