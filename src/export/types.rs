//! Transcoding types
//!
//! Progress reporting and error handling for converting finished
//! recordings to MP4.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Conversion progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeProgress {
    /// Output time written so far (milliseconds)
    pub out_time_ms: u64,
    /// Progress ratio (0.0 to 1.0), None while the duration is unknown
    pub ratio: Option<f64>,
}

impl TranscodeProgress {
    pub fn new(out_time_ms: u64, duration_ms: Option<u64>) -> Self {
        let ratio = duration_ms
            .filter(|d| *d > 0)
            .map(|d| (out_time_ms as f64 / d as f64).clamp(0.0, 1.0));
        Self { out_time_ms, ratio }
    }

    pub fn complete(duration_ms: Option<u64>) -> Self {
        Self {
            out_time_ms: duration_ms.unwrap_or(0),
            ratio: Some(1.0),
        }
    }
}

/// Transcoding errors
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Conversion failed: {0}")]
    Failed(String),

    #[error("A conversion is already in progress")]
    Busy,
}

/// Result type for transcoding
pub type TranscodeResult<T> = Result<T, TranscodeError>;

/// `name.webm` becomes `name.mp4`; other names get `.mp4` appended
pub fn mp4_name(name: &str) -> String {
    match name.strip_suffix(".webm") {
        Some(stem) => format!("{}.mp4", stem),
        None => format!("{}.mp4", name),
    }
}
