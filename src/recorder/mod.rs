//! Recording session module
//!
//! This module implements the single-session recorder:
//! - Encoder/EncoderFactory traits for the host encoder
//! - RecordingCoordinator owning the session slot and its state machine
//! - SessionRunner streaming encoder output into the persistence sink

pub mod coordinator;
pub mod encoder;
pub mod error;
mod runner;
pub mod state;

pub use coordinator::{RecordingCoordinator, RecordingEvent, SessionRequest};
pub use encoder::{pick_mime_type, Encoder, EncoderConfig, EncoderEvent, EncoderFactory};
pub use error::{RecordingError, RecordingResult};
pub use state::{format_elapsed, CaptureOptions, SessionClock, SessionState};
