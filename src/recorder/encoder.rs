//! Encoder interface
//!
//! The encoder itself is provided by the host. Once started it emits the
//! encoded stream as ordered chunks, flushed at a fixed interval, and a
//! final [`EncoderEvent::Stopped`] after [`Encoder::stop`].

use super::error::RecordingResult;
use crate::capture::LiveSource;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Encoder settings for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Container/codec hint. Empty lets the encoder choose.
    pub mime_type: String,
    pub video_bits_per_second: u64,
}

/// Output of a running encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// Next piece of the encoded stream
    Chunk(Vec<u8>),
    /// No more chunks will follow
    Stopped,
}

/// A created encoder bound to one source
pub trait Encoder: Send + Sync {
    /// Begin encoding, flushing a chunk every `flush_interval`
    fn start(&self, flush_interval: Duration) -> RecordingResult<mpsc::UnboundedReceiver<EncoderEvent>>;

    fn pause(&self);

    fn resume(&self);

    /// Flush what is left and emit [`EncoderEvent::Stopped`]
    fn stop(&self);
}

/// Creates encoders
#[async_trait]
pub trait EncoderFactory: Send + Sync {
    fn supports_mime(&self, mime_type: &str) -> bool;

    async fn create(&self, source: &LiveSource, config: &EncoderConfig) -> RecordingResult<Arc<dyn Encoder>>;
}

/// First supported candidate, or an empty hint when none is
pub fn pick_mime_type(factory: &dyn EncoderFactory, candidates: &[String]) -> String {
    candidates
        .iter()
        .find(|candidate| factory.supports_mime(candidate))
        .cloned()
        .unwrap_or_default()
}
