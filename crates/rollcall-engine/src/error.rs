use rollcall_core::ExtractError;
use thiserror::Error;

use crate::store::StoreError;

/// Every way a registration or attendance call can fail.
///
/// Messages are shown to end users verbatim in the CLI's JSON result.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid student ID format '{0}'. Use only letters and numbers.")]
    InvalidIdentifier(String),
    #[error("Student ID '{0}' is already registered.")]
    AlreadyRegistered(String),
    #[error("Registration failed: No face could be detected in the image.")]
    NoFaceDetected,
    #[error("Multiple faces were detected ({0}). Please use an image with only one person.")]
    AmbiguousInput(usize),
    #[error(
        "Face already registered as Student ID: {id}, Name: {name} (Similarity: {:.2}%). Cannot register duplicate face.",
        .similarity * 100.0
    )]
    DuplicateFace {
        id: String,
        name: String,
        similarity: f32,
    },
    #[error("No students are registered in the system. Cannot take attendance.")]
    EmptyRegistry,
    #[error("Invalid date format: {0}. Expected YYYY-MM-DD.")]
    InvalidDate(String),
    #[error("Cannot read the image file at: {path} ({reason})")]
    UnreadableImage { path: String, reason: String },
    #[error("storage unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("Unauthorized: Invalid token.")]
    Unauthorized,
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl Error {
    /// Stable machine-readable kind, used as the `error` field of JSON results.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidIdentifier(_) => "invalid_identifier",
            Error::AlreadyRegistered(_) => "already_registered",
            Error::NoFaceDetected => "no_face_detected",
            Error::AmbiguousInput(_) => "ambiguous_input",
            Error::DuplicateFace { .. } => "duplicate_face",
            Error::EmptyRegistry => "empty_registry",
            Error::InvalidDate(_) => "invalid_date",
            Error::UnreadableImage { .. } => "unreadable_image",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::Unauthorized => "unauthorized",
            Error::Unexpected(_) => "unexpected",
        }
    }
}

impl From<ExtractError> for Error {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::NoFace => Error::NoFaceDetected,
            other => Error::Unexpected(other.to_string()),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
