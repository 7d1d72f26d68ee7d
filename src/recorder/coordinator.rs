//! Recording coordinator
//!
//! Owns the single session slot and drives a session through
//! Idle → Acquiring → Recording ⇄ Paused → Finalizing → Idle.
//!
//! The slot lives behind a lock that is never held across an `.await`, so
//! every transition is decided atomically. Once a session is recording, its
//! encoder output, ticks and display-ended notification are handled by one
//! spawned [`SessionRunner`](super::runner::SessionRunner).

use super::encoder::{pick_mime_type, Encoder, EncoderConfig, EncoderFactory};
use super::error::{RecordingError, RecordingResult};
use super::runner::{AcquiredSources, SessionRunner};
use super::state::{CaptureOptions, SessionClock, SessionState};
use crate::capture::{AcquisitionAdapter, CaptureError, LiveSource, Track};
use crate::compositor::{apply_crop, compose};
use crate::config::RecorderConfig;
use crate::schedule::ScheduleId;
use crate::storage::{
    artifact_file_name, DestinationTable, IncrementalWriter, PersistenceSink, RecordingArtifact,
    SinkSlot,
};
use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

/// Events emitted to the presentation layer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum RecordingEvent {
    /// The session moved to a new state
    StateChanged {
        state: SessionState,
        owner: Option<ScheduleId>,
    },
    /// Elapsed recording time
    Tick { elapsed_ms: u64 },
    /// A session finished and produced a recording
    ArtifactProduced {
        artifact: RecordingArtifact,
        owner: Option<ScheduleId>,
    },
    /// The schedule list changed
    SchedulesChanged,
    /// MP4 conversion progress, 0.0 to 1.0
    ConversionProgress { name: String, ratio: f64 },
    /// Something failed without stopping anything
    Warning(String),
    /// A start attempt failed
    Error(String),
}

/// A request to start a session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub options: CaptureOptions,
    /// Schedule that owns the session (None = manual)
    pub owner: Option<ScheduleId>,
    /// A display source acquired ahead of time
    pub display: Option<LiveSource>,
}

impl SessionRequest {
    pub fn manual(options: CaptureOptions) -> Self {
        Self {
            options,
            owner: None,
            display: None,
        }
    }

    pub fn scheduled(options: CaptureOptions, owner: ScheduleId, display: Option<LiveSource>) -> Self {
        Self {
            options,
            owner: Some(owner),
            display,
        }
    }
}

struct ActiveSession {
    owner: Option<ScheduleId>,
    encoder: Arc<dyn Encoder>,
    clock: SessionClock,
    paused: bool,
}

enum SessionSlot {
    Idle,
    Acquiring {
        owner: Option<ScheduleId>,
        stop_requested: bool,
    },
    Active(ActiveSession),
    Finalizing {
        owner: Option<ScheduleId>,
        clock: SessionClock,
    },
}

impl SessionSlot {
    fn state(&self) -> SessionState {
        match self {
            SessionSlot::Idle => SessionState::Idle,
            SessionSlot::Acquiring { .. } => SessionState::Acquiring,
            SessionSlot::Active(session) if session.paused => SessionState::Paused,
            SessionSlot::Active(_) => SessionState::Recording,
            SessionSlot::Finalizing { .. } => SessionState::Finalizing,
        }
    }

    fn owner(&self) -> Option<ScheduleId> {
        match self {
            SessionSlot::Idle => None,
            SessionSlot::Acquiring { owner, .. } | SessionSlot::Finalizing { owner, .. } => *owner,
            SessionSlot::Active(session) => session.owner,
        }
    }
}

struct Inner {
    config: RecorderConfig,
    acquisition: Arc<AcquisitionAdapter>,
    encoders: Arc<dyn EncoderFactory>,
    destinations: Arc<DestinationTable>,
    sink_slot: SinkSlot,
    slot: Mutex<SessionSlot>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

/// Runs at most one recording session at a time
#[derive(Clone)]
pub struct RecordingCoordinator {
    inner: Arc<Inner>,
}

impl RecordingCoordinator {
    /// Create a new recording coordinator
    pub fn new(
        config: RecorderConfig,
        acquisition: Arc<AcquisitionAdapter>,
        encoders: Arc<dyn EncoderFactory>,
        destinations: Arc<DestinationTable>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                config,
                acquisition,
                encoders,
                destinations,
                sink_slot: SinkSlot::new(),
                slot: Mutex::new(SessionSlot::Idle),
                event_tx,
            }),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.inner.config
    }

    pub fn acquisition(&self) -> &Arc<AcquisitionAdapter> {
        &self.inner.acquisition
    }

    pub fn destinations(&self) -> &Arc<DestinationTable> {
        &self.inner.destinations
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        self.inner.slot.lock().state()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Schedule that owns the current session, if any
    pub fn owner(&self) -> Option<ScheduleId> {
        self.inner.slot.lock().owner()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.inner.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: RecordingEvent) {
        // No subscribers is fine
        let _ = self.inner.event_tx.send(event);
    }

    fn emit_state(&self, state: SessionState, owner: Option<ScheduleId>) {
        tracing::debug!("Session state: {:?} (owner {:?})", state, owner);
        self.emit(RecordingEvent::StateChanged { state, owner });
    }

    /// Elapsed recording time in milliseconds, excluding pauses
    pub fn duration_ms(&self) -> u64 {
        let now = Instant::now();
        let elapsed = match &*self.inner.slot.lock() {
            SessionSlot::Active(session) => session.clock.elapsed(now),
            SessionSlot::Finalizing { clock, .. } => clock.elapsed(now),
            SessionSlot::Idle | SessionSlot::Acquiring { .. } => Default::default(),
        };
        elapsed.as_millis() as u64
    }

    /// Start a session.
    ///
    /// Fails with [`RecordingError::AlreadyActive`] unless the slot is idle.
    /// Any failure after the slot was claimed releases what was acquired and
    /// returns the slot to Idle.
    pub async fn start(&self, request: SessionRequest) -> RecordingResult<()> {
        request.options.validate(self.inner.config.min_crop_size)?;

        {
            let mut slot = self.inner.slot.lock();
            if !matches!(*slot, SessionSlot::Idle) {
                return Err(RecordingError::AlreadyActive);
            }
            *slot = SessionSlot::Acquiring {
                owner: request.owner,
                stop_requested: false,
            };
        }
        let owner = request.owner;
        tracing::info!("Starting recording (owner {:?})", owner);
        self.emit_state(SessionState::Acquiring, owner);

        let mut sources = AcquiredSources::default();
        match self.launch(request, &mut sources).await {
            Ok(()) => Ok(()),
            Err(e) => {
                sources.release(&self.inner.acquisition);
                *self.inner.slot.lock() = SessionSlot::Idle;
                if e.is_user_cancelled() {
                    tracing::info!("Recording start cancelled by user");
                } else if owner.is_none() {
                    tracing::error!("Failed to start recording: {}", e);
                    self.emit(RecordingEvent::Error(e.to_string()));
                }
                // Scheduled failures are reported by the schedule engine
                self.emit_state(SessionState::Idle, owner);
                Err(e)
            }
        }
    }

    async fn launch(&self, request: SessionRequest, sources: &mut AcquiredSources) -> RecordingResult<()> {
        let SessionRequest {
            options,
            owner,
            display,
        } = request;
        let config = &self.inner.config;

        let display = match display {
            Some(source) if source.video_track().is_some_and(Track::is_live) => {
                tracing::debug!("Using pre-armed display source");
                source
            }
            stale => {
                if let Some(source) = stale {
                    tracing::info!("Pre-armed display source has ended, acquiring a new one");
                    source.stop();
                }
                self.inner
                    .acquisition
                    .acquire_display(&options.display_constraints())
                    .await?
            }
        };
        sources.display = Some(display.clone());
        let video = display
            .video_track()
            .cloned()
            .ok_or(CaptureError::NoSourceAvailable(
                "display source has no video track".into(),
            ))?;

        let microphone = if options.microphone {
            self.inner.acquisition.acquire_microphone().await
        } else {
            None
        };
        sources.microphone = microphone.clone();

        let system_audio = if options.system_audio {
            display.audio_track()
        } else {
            None
        };
        let mic_track = microphone.as_ref().and_then(LiveSource::audio_track);

        let mut composed = compose(&video, mic_track, system_audio);
        if let Some(area) = &options.crop {
            composed = apply_crop(composed, area, options.frame_rate)?;
        }
        let source = composed.source().clone();
        sources.composed = Some(composed);

        let encoder_config = EncoderConfig {
            mime_type: pick_mime_type(self.inner.encoders.as_ref(), &config.mime_candidates),
            video_bits_per_second: options.video_bitrate,
        };
        tracing::debug!(
            "Encoder: mime '{}', {} bit/s",
            encoder_config.mime_type,
            encoder_config.video_bits_per_second
        );
        let encoder = self.inner.encoders.create(&source, &encoder_config).await?;

        let name = artifact_file_name(&config.artifact_prefix, &config.container_extension, Local::now());
        let sink = self.open_sink(&options, owner, &name).await;

        let events = encoder.start(config.chunk_interval())?;

        let stop_requested = {
            let mut slot = self.inner.slot.lock();
            let stop_requested = matches!(
                *slot,
                SessionSlot::Acquiring {
                    stop_requested: true,
                    ..
                }
            );
            *slot = SessionSlot::Active(ActiveSession {
                owner,
                encoder: encoder.clone(),
                clock: SessionClock::start(Instant::now()),
                paused: false,
            });
            stop_requested
        };

        tracing::info!("Recording started: {}", name);
        self.emit_state(SessionState::Recording, owner);

        let runner = SessionRunner {
            recorder: self.clone(),
            events,
            sink,
            sources: std::mem::take(sources),
            display_video: video,
            autosave: options.incremental_persistence,
            owner,
        };
        tokio::spawn(runner.run());

        if stop_requested {
            tracing::info!("Stop was requested while acquiring, stopping now");
            self.request_stop();
        }
        Ok(())
    }

    /// Incremental when requested and a destination is known, deferred otherwise
    async fn open_sink(&self, options: &CaptureOptions, owner: Option<ScheduleId>, name: &str) -> PersistenceSink {
        if !options.incremental_persistence {
            return PersistenceSink::deferred(name);
        }
        let Some(directory) = self.inner.destinations.resolve(owner.as_ref()) else {
            tracing::debug!("No destination yet, keeping chunks in memory");
            return PersistenceSink::deferred(name);
        };
        match IncrementalWriter::begin(&self.inner.sink_slot, directory.as_ref(), name).await {
            Ok(writer) => PersistenceSink::incremental(writer),
            Err(e) => {
                tracing::warn!("Cannot stream to {}: {}, keeping chunks in memory", directory.name(), e);
                self.emit(RecordingEvent::Warning(format!("Cannot save while recording: {}", e)));
                PersistenceSink::deferred(name)
            }
        }
    }

    /// Pause the current session
    pub fn pause(&self) -> RecordingResult<()> {
        let encoder = {
            let mut slot = self.inner.slot.lock();
            let SessionSlot::Active(session) = &mut *slot else {
                return Err(RecordingError::NotRecording);
            };
            if session.paused {
                return Ok(());
            }
            session.paused = true;
            session.clock.pause(Instant::now());
            session.encoder.clone()
        };

        encoder.pause();
        tracing::info!("Recording paused");
        self.emit_state(SessionState::Paused, self.owner());
        Ok(())
    }

    /// Resume a paused session
    pub fn resume(&self) -> RecordingResult<()> {
        let encoder = {
            let mut slot = self.inner.slot.lock();
            let SessionSlot::Active(session) = &mut *slot else {
                return Err(RecordingError::NotRecording);
            };
            if !session.paused {
                return Ok(());
            }
            session.paused = false;
            session.clock.resume(Instant::now());
            session.encoder.clone()
        };

        encoder.resume();
        tracing::info!("Recording resumed");
        self.emit_state(SessionState::Recording, self.owner());
        Ok(())
    }

    /// Stop the current session.
    ///
    /// While acquiring, the stop is remembered and applied once recording
    /// begins. Stopping an already finalizing session does nothing.
    pub fn stop(&self) -> RecordingResult<()> {
        if self.state() == SessionState::Idle {
            return Err(RecordingError::NotRecording);
        }
        self.request_stop();
        Ok(())
    }

    /// Ask the session owned by `id` to stop. Returns whether that schedule
    /// owns the current session.
    pub fn request_stop_for(&self, id: &ScheduleId) -> bool {
        if self.owner().as_ref() != Some(id) {
            return false;
        }
        self.request_stop();
        true
    }

    /// Move towards Finalizing. The encoder is told to stop exactly once.
    pub(super) fn request_stop(&self) {
        let (encoder, owner) = {
            let mut slot = self.inner.slot.lock();
            match &mut *slot {
                SessionSlot::Idle | SessionSlot::Finalizing { .. } => return,
                SessionSlot::Acquiring { stop_requested, .. } => {
                    *stop_requested = true;
                    return;
                }
                SessionSlot::Active(session) => {
                    let mut clock = session.clock;
                    clock.freeze(Instant::now());
                    let encoder = session.encoder.clone();
                    let owner = session.owner;
                    *slot = SessionSlot::Finalizing { owner, clock };
                    (encoder, owner)
                }
            }
        };

        tracing::info!("Stopping recording");
        self.emit_state(SessionState::Finalizing, owner);
        encoder.stop();
    }

    /// Enter Finalizing when the encoder stopped on its own
    pub(super) fn enter_finalizing(&self) {
        let owner = {
            let mut slot = self.inner.slot.lock();
            let SessionSlot::Active(session) = &*slot else {
                return;
            };
            let mut clock = session.clock;
            clock.freeze(Instant::now());
            let owner = session.owner;
            *slot = SessionSlot::Finalizing { owner, clock };
            owner
        };
        tracing::warn!("Encoder stopped without a stop request");
        self.emit_state(SessionState::Finalizing, owner);
    }

    pub(super) fn emit_tick(&self) {
        if matches!(self.state(), SessionState::Recording | SessionState::Paused) {
            self.emit(RecordingEvent::Tick {
                elapsed_ms: self.duration_ms(),
            });
        }
    }

    /// Return to Idle and report the result of the session
    pub(super) fn finish_session(&self, owner: Option<ScheduleId>, artifact: Option<RecordingArtifact>) {
        *self.inner.slot.lock() = SessionSlot::Idle;

        match artifact {
            Some(artifact) => {
                tracing::info!(
                    "Recording finished: {} ({} MB)",
                    artifact.name,
                    artifact.size_mb()
                );
                self.emit(RecordingEvent::ArtifactProduced { artifact, owner });
            }
            None => {
                tracing::error!("Recording finished without a usable file");
                self.emit(RecordingEvent::Warning(
                    "The recording could not be saved".to_string(),
                ));
            }
        }

        self.emit_state(SessionState::Idle, owner);
    }
}
