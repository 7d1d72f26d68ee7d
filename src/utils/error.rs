//! Error types and handling
//!
//! Common error types used across the application.

use crate::capture::{CaptureError, PreferencesError};
use crate::compositor::CompositorError;
use crate::export::TranscodeError;
use crate::recorder::RecordingError;
use crate::schedule::ScheduleError;
use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Compositor(#[from] CompositorError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Preferences(#[from] PreferencesError),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Config(format!("{:#}", error))
    }
}

/// Error response for frontend
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

fn capture_code(error: &CaptureError) -> &'static str {
    match error {
        CaptureError::PermissionDenied(_) => "PERMISSION_DENIED",
        CaptureError::UserCancelled => "USER_CANCELLED",
        CaptureError::NoSourceAvailable(_) => "NO_SOURCE",
        CaptureError::Platform(_) => "RECORDING_ERROR",
    }
}

fn compositor_code(error: &CompositorError) -> &'static str {
    match error {
        CompositorError::CropTooSmall { .. } => "CROP_TOO_SMALL",
        CompositorError::MissingVideo => "NO_SOURCE",
        CompositorError::InvalidCrop(_) => "RECORDING_ERROR",
    }
}

fn recording_code(error: &RecordingError) -> &'static str {
    match error {
        RecordingError::Capture(e) => capture_code(e),
        RecordingError::Compositor(e) => compositor_code(e),
        RecordingError::Storage(_) => "STORAGE_ERROR",
        RecordingError::AlreadyActive => "ALREADY_RECORDING",
        RecordingError::NotRecording => "NOT_RECORDING",
        RecordingError::InvalidOptions(_) | RecordingError::EncodingError(_) => "RECORDING_ERROR",
    }
}

impl AppError {
    /// Stable code for the presentation layer
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) | AppError::Config(_) => "CONFIG_ERROR",
            AppError::Capture(e) => capture_code(e),
            AppError::Compositor(e) => compositor_code(e),
            AppError::Storage(_) | AppError::Preferences(_) => "STORAGE_ERROR",
            AppError::Recording(e) => recording_code(e),
            AppError::Schedule(e) => match e {
                ScheduleError::InvalidWindow { .. } => "INVALID_SCHEDULE",
                ScheduleError::NotFound(_) => "SCHEDULE_NOT_FOUND",
                ScheduleError::Overlap(_) => "ALREADY_RECORDING",
                ScheduleError::Recording(e) => recording_code(e),
                ScheduleError::Capture(e) => capture_code(e),
            },
            AppError::Transcode(_) => "TRANSCODE_ERROR",
        }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

macro_rules! into_response {
    ($($error:ty),*) => {
        $(
            impl From<$error> for ErrorResponse {
                fn from(error: $error) -> Self {
                    AppError::from(error).into()
                }
            }
        )*
    };
}

into_response!(
    CaptureError,
    CompositorError,
    StorageError,
    RecordingError,
    ScheduleError,
    TranscodeError
);

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
