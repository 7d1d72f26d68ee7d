//! Recording commands

use super::AppState;
use crate::compositor::CropArea;
use crate::recorder::{format_elapsed, CaptureOptions, SessionRequest, SessionState};
use crate::schedule::ScheduleId;
use crate::utils::ErrorResponse;
use serde::Serialize;

/// Snapshot of the recorder for display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub state: SessionState,
    pub duration_ms: u64,
    /// `HH:MM:SS`
    pub elapsed: String,
    /// Schedule that started the session, None for manual recordings
    pub owner: Option<ScheduleId>,
}

/// Start a manual recording
///
/// `options` defaults to the configured capture options. The active crop
/// selection is applied unless the options carry their own.
pub async fn start_recording(
    state: &AppState,
    options: Option<CaptureOptions>,
) -> Result<(), ErrorResponse> {
    let options = state.resolve_options(options);
    tracing::info!(
        "Start requested: {} fps, {}, crop {}",
        options.frame_rate,
        options.resolution_label(),
        options.crop.is_some()
    );
    state.recorder.start(SessionRequest::manual(options)).await?;
    Ok(())
}

pub fn stop_recording(state: &AppState) -> Result<(), ErrorResponse> {
    state.recorder.stop()?;
    Ok(())
}

pub fn pause_recording(state: &AppState) -> Result<(), ErrorResponse> {
    state.recorder.pause()?;
    Ok(())
}

pub fn resume_recording(state: &AppState) -> Result<(), ErrorResponse> {
    state.recorder.resume()?;
    Ok(())
}

pub fn get_recording_state(state: &AppState) -> SessionState {
    state.recorder.state()
}

/// Elapsed recording time in milliseconds, paused time excluded
pub fn get_recording_duration(state: &AppState) -> u64 {
    state.recorder.duration_ms()
}

pub fn get_recording_status(state: &AppState) -> RecordingStatus {
    let duration_ms = state.recorder.duration_ms();
    RecordingStatus {
        state: state.recorder.state(),
        duration_ms,
        elapsed: format_elapsed(duration_ms),
        owner: state.recorder.owner(),
    }
}

/// Set or clear the active crop. A rectangle under the minimum size is
/// rejected and the previous selection kept.
pub fn set_crop_area(state: &AppState, area: Option<CropArea>) -> Result<(), ErrorResponse> {
    match area {
        Some(area) => state.crop.set(area)?,
        None => state.crop.clear(),
    }
    Ok(())
}

pub fn get_crop_area(state: &AppState) -> Option<CropArea> {
    state.crop.current()
}
