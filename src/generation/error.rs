// Error types for the generation pipeline

use thiserror::Error;

/// Result type for generation operations
pub type Result<T> = std::result::Result<T, GenerationError>;

/// Message shown when no subject image was uploaded
pub const MISSING_SUBJECT_MESSAGE: &str = "subject image required";

/// Shown when a failure carries no description of its own
pub const FALLBACK_MESSAGE: &str = "an unknown error occurred while generating the image";

/// Errors that can occur while building, sending or exporting a generation.
///
/// The display string is what ends up in `GenerationState::Failed`, so
/// service errors display the service's own message untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("subject image required")]
    MissingSubject,

    #[error("failed to encode image: {0}")]
    Encoding(String),

    #[error("network error: {0}")]
    Transport(String),

    #[error("{0}")]
    Service(String),

    #[error("a generation is already in progress")]
    Busy,

    #[error("no generated image to export")]
    NothingToExport,

    #[error("export failed: {0}")]
    Export(String),
}

impl GenerationError {
    /// Human readable description for the failed state
    pub fn user_message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            FALLBACK_MESSAGE.to_string()
        } else {
            message
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Transport(format!("request timed out: {}", err))
        } else {
            GenerationError::Transport(err.to_string())
        }
    }
}

impl From<image::ImageError> for GenerationError {
    fn from(err: image::ImageError) -> Self {
        GenerationError::Export(err.to_string())
    }
}
