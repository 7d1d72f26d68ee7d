//! Export command handlers
//!
//! Converts finished recordings to MP4. Progress is emitted as
//! `ConversionProgress` events on the recorder channel.

use super::AppState;
use crate::export::{convert_artifact, TranscodeError};
use crate::storage::RecordingArtifact;
use crate::utils::ErrorResponse;
use std::sync::atomic::{AtomicBool, Ordering};

/// Tracks whether a conversion is running
#[derive(Debug, Default)]
pub struct ExportState {
    is_converting: AtomicBool,
}

impl ExportState {
    pub fn is_converting(&self) -> bool {
        self.is_converting.load(Ordering::SeqCst)
    }
}

/// Clears the converting flag when the conversion ends
struct ConvertingGuard<'a>(&'a AtomicBool);

impl Drop for ConvertingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Convert a recording to MP4. One conversion runs at a time; the original
/// artifact is never modified.
pub async fn convert_to_mp4(
    state: &AppState,
    artifact: RecordingArtifact,
) -> Result<RecordingArtifact, ErrorResponse> {
    if state.export.is_converting.swap(true, Ordering::SeqCst) {
        return Err(TranscodeError::Busy.into());
    }
    let _guard = ConvertingGuard(&state.export.is_converting);

    Ok(convert_artifact(state.transcoder.as_ref(), &artifact, &state.recorder).await?)
}

pub fn is_converting(state: &AppState) -> bool {
    state.export.is_converting()
}
