//! Recording state management
//!
//! Defines the session state machine, the capture options a session is
//! started with, and the elapsed-time clock.

use super::error::{RecordingError, RecordingResult};
use crate::capture::{DisplayConstraints, Resolution};
use crate::compositor::CropArea;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Current state of the recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session
    #[default]
    Idle,
    /// Sources are being requested
    Acquiring,
    /// Encoder running
    Recording,
    /// Encoder paused
    Paused,
    /// Waiting for the encoder to drain and the artifact to be written
    Finalizing,
}

impl SessionState {
    /// Whether a session occupies the slot
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

/// What to capture and how to encode it
///
/// A session takes its own copy when it starts; later changes to the
/// caller's options do not affect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureOptions {
    /// Frames per second
    pub frame_rate: u32,

    /// Capture the system audio alongside the display
    pub system_audio: bool,

    /// Capture the microphone
    pub microphone: bool,

    /// Encoder video bitrate in bits per second
    pub video_bitrate: u64,

    /// Stream chunks to the destination while recording
    pub incremental_persistence: bool,

    /// Ideal resolution (None = Auto)
    pub resolution: Option<Resolution>,

    /// Crop rectangle (None = full frame)
    pub crop: Option<CropArea>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            system_audio: false,
            microphone: false,
            video_bitrate: 2_500_000,
            incremental_persistence: false,
            resolution: None,
            crop: None,
        }
    }
}

impl CaptureOptions {
    /// Reject options no session could be started with
    pub fn validate(&self, min_crop_size: f64) -> RecordingResult<()> {
        if self.frame_rate == 0 {
            return Err(RecordingError::InvalidOptions(
                "frame rate must be positive".into(),
            ));
        }
        if self.video_bitrate == 0 {
            return Err(RecordingError::InvalidOptions(
                "video bitrate must be positive".into(),
            ));
        }
        if let Some(resolution) = &self.resolution {
            if resolution.width == 0 || resolution.height == 0 {
                return Err(RecordingError::InvalidOptions(format!(
                    "invalid resolution {}",
                    resolution
                )));
            }
        }
        if let Some(crop) = &self.crop {
            crop.validate(min_crop_size)?;
        }
        Ok(())
    }

    pub fn display_constraints(&self) -> DisplayConstraints {
        DisplayConstraints {
            frame_rate: self.frame_rate,
            resolution: self.resolution,
            system_audio: self.system_audio,
        }
    }

    /// "Auto" or "WxH"
    pub fn resolution_label(&self) -> String {
        self.resolution
            .map(|r| r.to_string())
            .unwrap_or_else(|| "Auto".to_string())
    }
}

/// Elapsed recording time, excluding pauses
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionClock {
    started: Option<Instant>,
    paused_total: Duration,
    pause_started: Option<Instant>,
    frozen: Option<Duration>,
}

impl SessionClock {
    pub fn start(now: Instant) -> Self {
        Self {
            started: Some(now),
            ..Default::default()
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if self.pause_started.is_none() && self.frozen.is_none() {
            self.pause_started = Some(now);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if let Some(paused_at) = self.pause_started.take() {
            self.paused_total += now.saturating_duration_since(paused_at);
        }
    }

    /// Stop the clock for good, keeping the current reading
    pub fn freeze(&mut self, now: Instant) {
        if self.frozen.is_none() {
            self.frozen = Some(self.elapsed(now));
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause_started.is_some()
    }

    /// `(now - start) - paused`, never negative
    pub fn elapsed(&self, now: Instant) -> Duration {
        if let Some(frozen) = self.frozen {
            return frozen;
        }
        let Some(started) = self.started else {
            return Duration::ZERO;
        };
        // While paused, time stops at the pause instant
        let until = self.pause_started.unwrap_or(now);
        until
            .saturating_duration_since(started)
            .saturating_sub(self.paused_total)
    }
}

/// Format milliseconds as `HH:MM:SS`
pub fn format_elapsed(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    )
}
