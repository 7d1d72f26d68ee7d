//! Capture acquisition adapter
//!
//! Thin layer over a [`CaptureBackend`] that adds the microphone policy:
//! microphone failures never abort a recording, the granted device is
//! remembered through [`Preferences`], and a still-live microphone is
//! reused (muted/unmuted) instead of being requested again.

use super::preferences::{Preferences, PREFERRED_MICROPHONE_KEY};
use super::traits::{
    CaptureBackend, CaptureError, CaptureResult, DisplayConstraints, LiveSource,
    MicrophoneConstraints,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Hands out display and microphone sources
pub struct AcquisitionAdapter {
    backend: Arc<dyn CaptureBackend>,
    preferences: Arc<dyn Preferences>,
    microphone: Mutex<Option<LiveSource>>,
}

impl AcquisitionAdapter {
    pub fn new(backend: Arc<dyn CaptureBackend>, preferences: Arc<dyn Preferences>) -> Self {
        Self {
            backend,
            preferences,
            microphone: Mutex::new(None),
        }
    }

    /// Acquire a display source. The returned source always has a video track.
    pub async fn acquire_display(&self, constraints: &DisplayConstraints) -> CaptureResult<LiveSource> {
        tracing::debug!(
            "Requesting display source: {} fps, resolution {:?}, system audio {}",
            constraints.frame_rate,
            constraints.resolution,
            constraints.system_audio
        );

        let source = self.backend.request_display(constraints).await?;

        if source.video_track().is_none() {
            source.stop();
            return Err(CaptureError::NoSourceAvailable(
                "display source has no video track".to_string(),
            ));
        }

        tracing::info!(
            "Display source acquired ({} tracks)",
            source.tracks().len()
        );
        Ok(source)
    }

    /// Acquire the microphone, or None when it is unavailable.
    ///
    /// A microphone that is still live is unmuted and returned as-is so the
    /// original consent grant is preserved.
    pub async fn acquire_microphone(&self) -> Option<LiveSource> {
        let existing = self
            .microphone
            .lock()
            .as_ref()
            .filter(|source| source.is_live())
            .cloned();

        if let Some(source) = existing {
            tracing::debug!("Reusing live microphone");
            source.set_audio_enabled(true);
            return Some(source);
        }

        let constraints = MicrophoneConstraints {
            device_id: self.preferences.get(PREFERRED_MICROPHONE_KEY),
        };

        let source = match self.backend.request_microphone(&constraints).await {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!("Microphone not available: {}", e);
                return None;
            }
        };

        let Some(track) = source.audio_track() else {
            tracing::warn!("Microphone source has no audio track");
            source.stop();
            return None;
        };

        if let Some(device_id) = &track.settings().device_id {
            if let Err(e) = self.preferences.set(PREFERRED_MICROPHONE_KEY, device_id) {
                tracing::warn!("Failed to remember microphone device: {}", e);
            }
        }

        tracing::info!("Microphone acquired: {}", track.label());
        *self.microphone.lock() = Some(source.clone());
        Some(source)
    }

    /// Silence the microphone without ending it
    pub fn mute_microphone(&self) {
        if let Some(source) = self.microphone.lock().as_ref() {
            source.set_audio_enabled(false);
        }
    }

    pub fn microphone_is_live(&self) -> bool {
        self.microphone
            .lock()
            .as_ref()
            .is_some_and(LiveSource::is_live)
    }
}
