//! Error types for the ephemeral store

use thiserror::Error;

/// Failure of blob or metadata storage
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid blob key: {0:?}")]
    InvalidKey(String),
}

/// Why a submission carried no usable file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAbsence {
    /// The request had no file field at all
    NotInRequest,
    /// The file field was present but had no name or no content
    NothingSelected,
}

impl FileAbsence {
    fn message(self) -> &'static str {
        match self {
            FileAbsence::NotInRequest => "Keine Datei im Request",
            FileAbsence::NothingSelected => "Keine Datei ausgewählt",
        }
    }
}

/// Rejection of a submission, reported back to the client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{}", .0.message())]
    MissingFile(FileAbsence),

    #[error("Kommentar zu lang")]
    AnnotationTooLong,

    #[error("Ungültiger Dateityp")]
    UnsupportedType,

    #[error("Ungültige Bilddatei")]
    InvalidImageData,
}

/// Failure of [`Ingestor::submit`](crate::Ingestor::submit)
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
