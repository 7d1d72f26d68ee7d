//! Schedule commands

use super::AppState;
use crate::recorder::CaptureOptions;
use crate::schedule::{ScheduleId, ScheduleSummary, ScheduleWindow};
use crate::storage::{DirectoryHandle, LocalDirectory};
use crate::utils::ErrorResponse;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

/// Schedule a recording between `start` and `end`
///
/// Options are snapshotted now, with the active crop applied the same way
/// as for a manual start.
pub fn add_schedule(
    state: &AppState,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    options: Option<CaptureOptions>,
) -> Result<ScheduleId, ErrorResponse> {
    let window = ScheduleWindow::new(start, end)?;
    let options = state.resolve_options(options);
    Ok(state.scheduler.add(window, options)?)
}

pub fn cancel_schedule(state: &AppState, id: ScheduleId) -> Result<(), ErrorResponse> {
    state.scheduler.cancel(&id)?;
    Ok(())
}

pub fn list_schedules(state: &AppState) -> Vec<ScheduleSummary> {
    state.scheduler.list()
}

/// Pick the display source for a schedule ahead of time
pub async fn preselect_schedule_source(state: &AppState, id: ScheduleId) -> Result<(), ErrorResponse> {
    state.scheduler.preselect(&id).await?;
    Ok(())
}

/// Pick a display source before creating the schedule that will use it
pub async fn preselect_source(
    state: &AppState,
    options: Option<CaptureOptions>,
) -> Result<(), ErrorResponse> {
    let options = state.resolve_options(options);
    state.scheduler.preselect_global(&options).await?;
    Ok(())
}

pub fn set_schedule_directory(
    state: &AppState,
    id: ScheduleId,
    path: PathBuf,
) -> Result<(), ErrorResponse> {
    state
        .scheduler
        .set_directory(&id, Arc::new(LocalDirectory::new(path)))?;
    Ok(())
}

/// Directory used by recordings that have no directory of their own
pub fn set_default_directory(state: &AppState, path: Option<PathBuf>) {
    let directory = path.map(|p| Arc::new(LocalDirectory::new(p)) as Arc<dyn DirectoryHandle>);
    state.scheduler.set_default_directory(directory);
}
