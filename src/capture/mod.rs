//! Capture acquisition
//!
//! Live source handles, the platform backend trait, and the adapter that
//! applies the acquisition policy on top of it.

pub mod acquisition;
pub mod preferences;
pub mod traits;

pub use acquisition::AcquisitionAdapter;
pub use preferences::{FilePreferences, MemoryPreferences, Preferences, PreferencesError};
pub use traits::{
    AudioBuffer, AudioFeed, CaptureBackend, CaptureError, CaptureResult, DisplayConstraints,
    FrameFeed, LiveSource, MicrophoneConstraints, Resolution, Track, TrackKind, TrackSettings,
    VideoFrame,
};
