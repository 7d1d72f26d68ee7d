//! Command handlers
//!
//! The facade the presentation layer calls into. Every handler takes the
//! shared [`AppState`] and returns `Result<T, ErrorResponse>`; progress and
//! lifecycle changes arrive through [`AppState::subscribe`].

pub mod export;
pub mod recording;
pub mod schedule;

use crate::capture::{
    AcquisitionAdapter, CaptureBackend, FilePreferences, MemoryPreferences, Preferences,
};
use crate::compositor::CropSelection;
use crate::config::RecorderConfig;
use crate::export::Transcoder;
use crate::recorder::{CaptureOptions, EncoderFactory, RecordingCoordinator, RecordingEvent};
use crate::schedule::ScheduleEngine;
use crate::storage::{DestinationTable, LocalDirectory};
use crate::utils::AppResult;
use export::ExportState;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Application state shared by all commands
pub struct AppState {
    pub recorder: RecordingCoordinator,
    pub scheduler: ScheduleEngine,
    /// Active crop rectangle, applied to every new recording
    pub crop: CropSelection,
    pub transcoder: Arc<dyn Transcoder>,
    pub export: ExportState,
}

impl AppState {
    pub fn new(
        config: RecorderConfig,
        backend: Arc<dyn CaptureBackend>,
        encoders: Arc<dyn EncoderFactory>,
        preferences: Arc<dyn Preferences>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let destinations = Arc::new(DestinationTable::new());
        if let Some(dir) = &config.output_directory {
            tracing::info!("Default output directory: {:?}", dir);
            destinations.set_default(Some(Arc::new(LocalDirectory::new(dir.clone()))));
        }

        let crop = CropSelection::new(config.min_crop_size);
        let acquisition = Arc::new(AcquisitionAdapter::new(backend, preferences));
        let recorder = RecordingCoordinator::new(config, acquisition, encoders, destinations);
        let scheduler = ScheduleEngine::new(recorder.clone());

        Self {
            recorder,
            scheduler,
            crop,
            transcoder,
            export: ExportState::default(),
        }
    }

    /// Preference store for `config`: the JSON file at `preferences_path`,
    /// or an in-memory store when no path is configured
    pub fn open_preferences(config: &RecorderConfig) -> AppResult<Arc<dyn Preferences>> {
        match &config.preferences_path {
            Some(path) => Ok(Arc::new(FilePreferences::open(path)?)),
            None => {
                tracing::warn!("No preferences path, microphone choice will not persist");
                Ok(Arc::new(MemoryPreferences::new()))
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.recorder.subscribe()
    }

    /// Options for a new recording: the configured defaults unless given,
    /// with the active crop filled in when none was requested
    fn resolve_options(&self, options: Option<CaptureOptions>) -> CaptureOptions {
        let mut options = options.unwrap_or_else(|| self.recorder.config().defaults.clone());
        if options.crop.is_none() {
            options.crop = self.crop.current();
        }
        options
    }
}
