//! Per-session task
//!
//! Feeds encoder chunks into the persistence sink, emits ticks, watches the
//! display for revocation and performs the Finalizing → Idle teardown.

use super::coordinator::RecordingCoordinator;
use super::encoder::EncoderEvent;
use crate::capture::{AcquisitionAdapter, LiveSource, Track};
use crate::compositor::ComposedSource;
use crate::schedule::ScheduleId;
use crate::storage::PersistenceSink;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Everything a session acquired, released together at the end
#[derive(Debug, Default)]
pub(super) struct AcquiredSources {
    pub(super) display: Option<LiveSource>,
    pub(super) microphone: Option<LiveSource>,
    pub(super) composed: Option<ComposedSource>,
}

impl AcquiredSources {
    /// Stop derived tracks and the display. The microphone is only muted so
    /// the next session can reuse it without a new prompt.
    pub(super) fn release(&mut self, acquisition: &AcquisitionAdapter) {
        if let Some(composed) = self.composed.take() {
            composed.release();
        }
        if let Some(display) = self.display.take() {
            display.stop();
        }
        if self.microphone.take().is_some() {
            acquisition.mute_microphone();
        }
    }
}

pub(super) struct SessionRunner {
    pub(super) recorder: RecordingCoordinator,
    pub(super) events: mpsc::UnboundedReceiver<EncoderEvent>,
    pub(super) sink: PersistenceSink,
    pub(super) sources: AcquiredSources,
    /// The display's own video track; its end means the user revoked capture
    pub(super) display_video: Track,
    /// Whether the finished recording should be saved to the destination
    pub(super) autosave: bool,
    pub(super) owner: Option<ScheduleId>,
}

enum RunnerStep {
    Chunk(Vec<u8>),
    EncoderDone,
    DisplayEnded,
    Tick,
}

impl SessionRunner {
    pub(super) async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.recorder.config().tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut display_ended = false;
        let mut chunks: usize = 0;

        loop {
            let step = tokio::select! {
                event = self.events.recv() => match event {
                    Some(EncoderEvent::Chunk(data)) => RunnerStep::Chunk(data),
                    Some(EncoderEvent::Stopped) | None => RunnerStep::EncoderDone,
                },
                _ = self.display_video.ended(), if !display_ended => RunnerStep::DisplayEnded,
                _ = ticker.tick() => RunnerStep::Tick,
            };

            match step {
                RunnerStep::Chunk(data) => {
                    chunks += 1;
                    self.sink.accept(data);
                }
                RunnerStep::EncoderDone => break,
                RunnerStep::DisplayEnded => {
                    display_ended = true;
                    tracing::info!("Display source ended, stopping recording");
                    self.recorder.request_stop();
                }
                RunnerStep::Tick => self.recorder.emit_tick(),
            }
        }

        tracing::debug!("Encoder done after {} chunks", chunks);
        self.finish().await;
    }

    async fn finish(self) {
        let SessionRunner {
            recorder,
            sink,
            mut sources,
            autosave,
            owner,
            ..
        } = self;

        recorder.enter_finalizing();

        // Consumes the owner's override either way
        let destination = recorder.destinations().take_for(owner.as_ref());
        let autosave_to = if autosave && !sink.is_incremental() {
            destination
        } else {
            None
        };

        let artifact = sink.finish(autosave_to).await;
        sources.release(recorder.acquisition());
        recorder.finish_session(owner, artifact);
    }
}
