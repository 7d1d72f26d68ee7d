//! Stream compositor
//!
//! Builds the single source handed to the encoder: the display video, plus
//! zero, one or a mix of two audio tracks, optionally cropped.

pub mod crop;
pub mod mixer;

pub use crop::{apply_crop, CropArea, CropGeometry, CropSelection, MIN_CROP_SIZE};
pub use mixer::{mix_audio, mix_sample};

use crate::capture::{LiveSource, Track};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Compositor errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompositorError {
    #[error("Crop area {width}x{height} is smaller than the minimum of {min}")]
    CropTooSmall { width: f64, height: f64, min: f64 },

    #[error("Source has no video track")]
    MissingVideo,

    #[error("Invalid crop: {0}")]
    InvalidCrop(String),
}

/// Result type for compositor operations
pub type CompositorResult<T> = Result<T, CompositorError>;

/// The source fed to the encoder, plus the tracks composition created
///
/// Only derived tracks belong to the composition. The input tracks stay
/// owned by whoever acquired them.
#[derive(Debug, Default)]
pub struct ComposedSource {
    source: LiveSource,
    derived: Vec<Track>,
    workers: Vec<JoinHandle<()>>,
}

impl ComposedSource {
    pub fn new(source: LiveSource) -> Self {
        Self {
            source,
            derived: Vec::new(),
            workers: Vec::new(),
        }
    }

    /// The combined source
    pub fn source(&self) -> &LiveSource {
        &self.source
    }

    pub fn video_track(&self) -> Option<&Track> {
        self.source.video_track()
    }

    /// Tracks created by composition (mixed audio, cropped video)
    pub fn derived_tracks(&self) -> &[Track] {
        &self.derived
    }

    fn replace_source(&mut self, source: LiveSource) {
        self.source = source;
    }

    fn adopt(&mut self, track: Track, worker: JoinHandle<()>) {
        self.derived.push(track);
        self.workers.push(worker);
    }

    /// Stop every derived track. Their worker tasks exit on their own.
    pub fn release(&self) {
        self.derived.iter().for_each(Track::stop);
    }

    /// Wait for every worker task to exit
    #[cfg(test)]
    pub(crate) async fn workers_finished(self) {
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Combine the display video with the available audio tracks.
///
/// Two audio tracks are mixed into one; a single one passes through unchanged.
pub fn compose(video: &Track, microphone: Option<&Track>, system_audio: Option<&Track>) -> ComposedSource {
    match (microphone, system_audio) {
        (None, None) => {
            tracing::debug!("Composing video only");
            ComposedSource::new(LiveSource::new(vec![video.clone()]))
        }
        (Some(audio), None) | (None, Some(audio)) => {
            tracing::debug!("Composing video with audio track '{}'", audio.label());
            ComposedSource::new(LiveSource::new(vec![video.clone(), audio.clone()]))
        }
        (Some(microphone), Some(system_audio)) => {
            tracing::debug!("Mixing microphone and system audio");
            let (mixed, worker) = mix_audio(microphone, system_audio);
            let mut composed = ComposedSource::new(LiveSource::new(vec![video.clone(), mixed.clone()]));
            composed.adopt(mixed, worker);
            composed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{TrackKind, TrackSettings};

    #[tokio::test]
    async fn test_compose_video_only() {
        let (video, _feed) = Track::video("screen", TrackSettings::default());
        let composed = compose(&video, None, None);
        assert_eq!(composed.source().tracks().len(), 1);
        assert!(composed.derived_tracks().is_empty());
    }

    #[tokio::test]
    async fn test_compose_single_audio_passes_through() {
        let (video, _feed) = Track::video("screen", TrackSettings::default());
        let (mic, _mic_feed) = Track::audio("mic", TrackSettings::default());
        let composed = compose(&video, Some(&mic), None);

        let audio = composed.source().audio_track().unwrap();
        assert!(audio.same_track(&mic));
        assert!(composed.derived_tracks().is_empty());
    }

    #[tokio::test]
    async fn test_compose_two_audio_tracks_are_mixed() {
        let (video, _feed) = Track::video("screen", TrackSettings::default());
        let (mic, _mic_feed) = Track::audio("mic", TrackSettings::default());
        let (system, _system_feed) = Track::audio("system", TrackSettings::default());
        let composed = compose(&video, Some(&mic), Some(&system));

        let tracks = composed.source().tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].kind(), TrackKind::Audio);
        assert!(!tracks[1].same_track(&mic));
        assert!(!tracks[1].same_track(&system));

        // Releasing stops the mix but never the inputs
        composed.release();
        assert!(!tracks[1].is_live());
        assert!(mic.is_live());
        assert!(system.is_live());
        assert!(video.is_live());
    }
}
