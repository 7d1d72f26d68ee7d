//! Recording errors

use crate::capture::CaptureError;
use crate::compositor::CompositorError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur while starting or controlling a session
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Compositor(#[from] CompositorError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("A recording is already in progress")]
    AlreadyActive,

    #[error("No recording in progress")]
    NotRecording,

    #[error("Invalid capture options: {0}")]
    InvalidOptions(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

impl RecordingError {
    /// The user dismissed the source picker. Not worth alarming anyone over.
    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, RecordingError::Capture(CaptureError::UserCancelled))
    }
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;
