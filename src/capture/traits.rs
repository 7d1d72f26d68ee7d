//! Capture trait definitions
//!
//! Platform-agnostic handles for live media and the backend trait that
//! hands them out. A [`LiveSource`] is a cheap, cloneable reference to
//! tracks owned by the host platform; the platform side pushes media
//! through the [`FrameFeed`]/[`AudioFeed`] returned when a track is created.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

/// Errors returned by capture acquisition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Source selection cancelled")]
    UserCancelled,

    #[error("No capture source available: {0}")]
    NoSourceAvailable(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Constraints passed to the platform when requesting a display source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayConstraints {
    /// Requested frame rate
    pub frame_rate: u32,

    /// Ideal resolution (None = let the platform decide)
    pub resolution: Option<Resolution>,

    /// Whether system audio should be captured alongside the video
    pub system_audio: bool,
}

/// Constraints passed to the platform when requesting a microphone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MicrophoneConstraints {
    /// Exact device to open, if one was remembered
    pub device_id: Option<String>,
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Settings the platform resolved for a track
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub device_id: Option<String>,
}

/// A single RGBA video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA pixels, row-major
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub const BYTES_PER_PIXEL: usize = 4;

    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    /// A fully transparent frame, or `None` when the buffer size overflows
    pub fn blank(width: u32, height: u32) -> Option<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(Self::BYTES_PER_PIXEL)?;
        Some(Self::new(width, height, vec![0; len]))
    }

    /// Whether the pixel buffer matches the declared dimensions
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * Self::BYTES_PER_PIXEL
    }
}

/// A block of interleaved f32 audio samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

enum TrackMedia {
    Video(watch::Sender<Option<Arc<VideoFrame>>>),
    Audio(broadcast::Sender<Arc<AudioBuffer>>),
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    settings: TrackSettings,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
    media: TrackMedia,
}

/// Handle to one live audio or video track
#[derive(Clone)]
pub struct Track {
    inner: Arc<TrackInner>,
}

impl Track {
    const AUDIO_BACKLOG: usize = 64;

    fn with_media(kind: TrackKind, label: &str, settings: TrackSettings, media: TrackMedia) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id: uuid::Uuid::new_v4().to_string(),
                kind,
                label: label.to_string(),
                settings,
                enabled: AtomicBool::new(true),
                ended,
                media,
            }),
        }
    }

    /// Create a video track and the feed used to publish its frames
    pub fn video(label: &str, settings: TrackSettings) -> (Self, FrameFeed) {
        let (tx, _) = watch::channel(None);
        let track = Self::with_media(TrackKind::Video, label, settings, TrackMedia::Video(tx));
        let feed = FrameFeed {
            track: track.clone(),
        };
        (track, feed)
    }

    /// Create an audio track and the feed used to push its samples
    pub fn audio(label: &str, settings: TrackSettings) -> (Self, AudioFeed) {
        let (tx, _) = broadcast::channel(Self::AUDIO_BACKLOG);
        let track = Self::with_media(TrackKind::Audio, label, settings, TrackMedia::Audio(tx));
        let feed = AudioFeed {
            track: track.clone(),
        };
        (track, feed)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn settings(&self) -> &TrackSettings {
        &self.inner.settings
    }

    /// Whether the track is still producing media
    pub fn is_live(&self) -> bool {
        !*self.inner.ended.borrow()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Mute or unmute the track without ending it
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// End the track. Idempotent.
    pub fn stop(&self) {
        if self.inner.ended.send_replace(true) {
            return;
        }
        tracing::debug!("Stopped {} track '{}'", self.inner.kind, self.inner.label);
    }

    /// Resolves once the track has ended, either through [`Track::stop`]
    /// or because the platform revoked it.
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// Latest-frame receiver for video tracks
    pub fn subscribe_frames(&self) -> Option<watch::Receiver<Option<Arc<VideoFrame>>>> {
        match &self.inner.media {
            TrackMedia::Video(tx) => Some(tx.subscribe()),
            TrackMedia::Audio(_) => None,
        }
    }

    /// Sample receiver for audio tracks
    pub fn subscribe_audio(&self) -> Option<broadcast::Receiver<Arc<AudioBuffer>>> {
        match &self.inner.media {
            TrackMedia::Audio(tx) => Some(tx.subscribe()),
            TrackMedia::Video(_) => None,
        }
    }

    /// Whether two handles refer to the same underlying track
    pub fn same_track(&self, other: &Track) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("live", &self.is_live())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Producer side of a video track
pub struct FrameFeed {
    track: Track,
}

impl FrameFeed {
    /// Replace the track's current frame. Ignored once the track has ended.
    pub fn publish(&self, frame: VideoFrame) {
        if !self.track.is_live() {
            return;
        }
        if let TrackMedia::Video(tx) = &self.track.inner.media {
            tx.send_replace(Some(Arc::new(frame)));
        }
    }

    pub fn track(&self) -> &Track {
        &self.track
    }
}

/// Producer side of an audio track
pub struct AudioFeed {
    track: Track,
}

impl AudioFeed {
    /// Push a block of samples. A muted track delivers silence.
    pub fn push(&self, mut buffer: AudioBuffer) {
        if !self.track.is_live() {
            return;
        }
        if !self.track.is_enabled() {
            buffer.samples.iter_mut().for_each(|s| *s = 0.0);
        }
        if let TrackMedia::Audio(tx) = &self.track.inner.media {
            // No subscribers is not an error
            let _ = tx.send(Arc::new(buffer));
        }
    }

    pub fn track(&self) -> &Track {
        &self.track
    }
}

/// A set of live tracks handed out by the platform
#[derive(Debug, Clone, Default)]
pub struct LiveSource {
    tracks: Vec<Track>,
}

impl LiveSource {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// First video track, if any
    pub fn video_track(&self) -> Option<&Track> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    /// First audio track, if any
    pub fn audio_track(&self) -> Option<&Track> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    /// A source is live while at least one of its tracks is
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(Track::is_live)
    }

    /// End every track of the source
    pub fn stop(&self) {
        self.tracks.iter().for_each(Track::stop);
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_tracks().for_each(|t| t.set_enabled(enabled));
    }
}

/// Platform capture backend
///
/// Implementations wrap whatever the host offers for screen/window and
/// microphone capture. Both calls may prompt the user.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Ask for a display (screen, window or tab) source
    async fn request_display(&self, constraints: &DisplayConstraints) -> CaptureResult<LiveSource>;

    /// Ask for a microphone source
    async fn request_microphone(
        &self,
        constraints: &MicrophoneConstraints,
    ) -> CaptureResult<LiveSource>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_source_liveness_follows_tracks() {
        let (video, _feed) = Track::video("screen", TrackSettings::default());
        let (audio, _audio_feed) = Track::audio("system", TrackSettings::default());
        let source = LiveSource::new(vec![video.clone(), audio.clone()]);

        assert!(source.is_live());
        video.stop();
        assert!(source.is_live());
        audio.stop();
        assert!(!source.is_live());
    }

    #[tokio::test]
    async fn test_ended_resolves_after_stop() {
        let (track, _feed) = Track::video("screen", TrackSettings::default());
        let waiter = {
            let track = track.clone();
            tokio::spawn(async move { track.ended().await })
        };
        track.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("ended() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_muted_audio_feed_delivers_silence() {
        let (track, feed) = Track::audio("mic", TrackSettings::default());
        let mut rx = track.subscribe_audio().unwrap();
        track.set_enabled(false);
        feed.push(AudioBuffer {
            sample_rate: 48000,
            channels: 1,
            samples: vec![0.5, -0.5],
        });
        let buffer = rx.recv().await.unwrap();
        assert_eq!(buffer.samples, vec![0.0, 0.0]);
    }

    #[test]
    fn test_blank_frame_size_overflow() {
        let frame = VideoFrame::blank(3, 2).unwrap();
        assert_eq!(frame.data.len(), 24);
        assert!(frame.is_well_formed());
        assert!(VideoFrame::blank(u32::MAX, u32::MAX).is_none());
    }

    #[test]
    fn test_frame_feed_ignored_after_stop() {
        let (track, feed) = Track::video("screen", TrackSettings::default());
        let rx = track.subscribe_frames().unwrap();
        track.stop();
        feed.publish(VideoFrame::blank(2, 2).unwrap());
        assert!(rx.borrow().is_none());
    }
}
