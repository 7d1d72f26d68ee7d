//! Schedule types

use crate::capture::{CaptureError, LiveSource};
use crate::recorder::{CaptureOptions, RecordingError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::task::AbortHandle;
use uuid::Uuid;

/// Unique schedule identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(Uuid);

impl ScheduleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ScheduleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Errors returned by the schedule engine
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Schedule must end after it starts ({start} .. {end})")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Schedule not found: {0}")]
    NotFound(ScheduleId),

    #[error("Schedule {0} skipped, another recording is in progress")]
    Overlap(ScheduleId),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Result type for schedule operations
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// A wall-clock time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ScheduleWindow {
    /// Rejects windows that do not end after they start
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> ScheduleResult<Self> {
        if end <= start {
            return Err(ScheduleError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Time from `now` until start and until end, clamped at zero
    pub fn delays_from(&self, now: DateTime<Utc>) -> (Duration, Duration) {
        let until = |at: DateTime<Utc>| (at - now).to_std().unwrap_or(Duration::ZERO);
        (until(self.start), until(self.end))
    }
}

/// A stored schedule
pub(super) struct Schedule {
    pub(super) window: ScheduleWindow,
    pub(super) options: CaptureOptions,
    pub(super) start_timer: Option<AbortHandle>,
    pub(super) stop_timer: Option<AbortHandle>,
    pub(super) preselected: Option<LiveSource>,
    /// Set once the start timer fired
    pub(super) started: bool,
}

impl Schedule {
    pub(super) fn new(window: ScheduleWindow, options: CaptureOptions, preselected: Option<LiveSource>) -> Self {
        Self {
            window,
            options,
            start_timer: None,
            stop_timer: None,
            preselected,
            started: false,
        }
    }

    /// Abort both timers and stop the pre-armed source
    pub(super) fn teardown(&mut self) {
        if let Some(timer) = self.start_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.stop_timer.take() {
            timer.abort();
        }
        if let Some(source) = self.preselected.take() {
            source.stop();
        }
    }
}

/// Schedule as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSummary {
    pub id: ScheduleId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub options: CaptureOptions,
    /// A live source is ready for the start
    pub source_ready: bool,
    /// Name of the schedule's own destination
    pub directory: Option<String>,
    pub started: bool,
    /// e.g. "Area • 30 FPS • 1280x720 • AutoSave"
    pub description: String,
}

/// One-line description of a schedule's options
pub fn describe_options(options: &CaptureOptions) -> String {
    format!(
        "{} • {} FPS • {} • {}",
        if options.crop.is_some() { "Area" } else { "Full screen" },
        options.frame_rate,
        options.resolution_label(),
        if options.incremental_persistence { "AutoSave" } else { "Manual" }
    )
}
