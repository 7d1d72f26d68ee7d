//! In-process fakes for the host collaborators, used by the unit tests

use crate::capture::{
    AcquisitionAdapter, CaptureBackend, CaptureError, CaptureResult, DisplayConstraints,
    LiveSource, MemoryPreferences, MicrophoneConstraints, Track, TrackSettings, VideoFrame,
};
use crate::config::RecorderConfig;
use crate::export::{
    mp4_name, ProgressCallback, TranscodeError, TranscodeProgress, TranscodeResult, Transcoder,
};
use crate::recorder::{
    Encoder, EncoderConfig, EncoderEvent, EncoderFactory, RecordingCoordinator, RecordingError,
    RecordingEvent, RecordingResult, SessionState,
};
use crate::storage::{
    ArtifactContent, DestinationTable, DirectoryHandle, FileHandle, RecordingArtifact,
    StorageError, StorageResult, StoredContent, WritableHandle,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Recorder config with short chunk and tick intervals
pub fn fast_config() -> RecorderConfig {
    RecorderConfig {
        chunk_interval_ms: 20,
        tick_interval_ms: 50,
        ..Default::default()
    }
}

/// Wait for the next produced artifact
pub async fn next_artifact(events: &mut broadcast::Receiver<RecordingEvent>) -> RecordingArtifact {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(RecordingEvent::ArtifactProduced { artifact, .. }) => return artifact,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(EVENT_TIMEOUT, wait)
        .await
        .expect("no artifact produced")
}

/// Everything currently queued on the receiver
pub fn drain_events(events: &mut broadcast::Receiver<RecordingEvent>) -> Vec<RecordingEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return drained,
        }
    }
}

/// Poll until the recorder reaches `state`
pub async fn wait_for_state(recorder: &RecordingCoordinator, state: SessionState) {
    let wait = async {
        while recorder.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(EVENT_TIMEOUT, wait)
        .await
        .unwrap_or_else(|_| panic!("recorder never reached {:?}", state));
}

/// A recorder wired to fakes
pub struct TestRig {
    pub recorder: RecordingCoordinator,
    pub backend: Arc<FakeCaptureBackend>,
    pub encoders: Arc<FakeEncoderFactory>,
    pub destinations: Arc<DestinationTable>,
}

impl TestRig {
    pub fn new() -> Self {
        let backend = FakeCaptureBackend::new();
        let encoders = FakeEncoderFactory::new();
        let destinations = Arc::new(DestinationTable::new());
        let acquisition = Arc::new(AcquisitionAdapter::new(
            backend.clone(),
            Arc::new(MemoryPreferences::new()),
        ));
        let recorder = RecordingCoordinator::new(
            fast_config(),
            acquisition,
            encoders.clone(),
            destinations.clone(),
        );
        Self {
            recorder,
            backend,
            encoders,
            destinations,
        }
    }
}

/// Capture backend handing out synthetic sources
#[derive(Default)]
pub struct FakeCaptureBackend {
    display_error: Mutex<Option<CaptureError>>,
    microphone_error: Mutex<Option<CaptureError>>,
    display_delay: Mutex<Duration>,
    displays: Mutex<Vec<LiveSource>>,
    microphones: Mutex<Vec<LiveSource>>,
    display_requests: AtomicUsize,
    microphone_constraints: Mutex<Vec<MicrophoneConstraints>>,
}

impl FakeCaptureBackend {
    pub const MICROPHONE_DEVICE: &'static str = "fake-mic-1";
    pub const DISPLAY_WIDTH: u32 = 1920;
    pub const DISPLAY_HEIGHT: u32 = 1080;

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_display(&self, error: Option<CaptureError>) {
        *self.display_error.lock() = error;
    }

    pub fn fail_microphone(&self, error: Option<CaptureError>) {
        *self.microphone_error.lock() = error;
    }

    /// Simulate a slow source picker
    pub fn set_display_delay(&self, delay: Duration) {
        *self.display_delay.lock() = delay;
    }

    pub fn display_requests(&self) -> usize {
        self.display_requests.load(Ordering::SeqCst)
    }

    pub fn microphone_requests(&self) -> usize {
        self.microphone_constraints.lock().len()
    }

    pub fn microphone_constraints(&self) -> Vec<MicrophoneConstraints> {
        self.microphone_constraints.lock().clone()
    }

    pub fn last_display(&self) -> Option<LiveSource> {
        self.displays.lock().last().cloned()
    }

    pub fn last_microphone(&self) -> Option<LiveSource> {
        self.microphones.lock().last().cloned()
    }
}

#[async_trait]
impl CaptureBackend for FakeCaptureBackend {
    async fn request_display(&self, constraints: &DisplayConstraints) -> CaptureResult<LiveSource> {
        let delay = *self.display_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.display_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.display_error.lock().clone() {
            return Err(error);
        }

        let (width, height) = constraints
            .resolution
            .map(|r| (r.width, r.height))
            .unwrap_or((Self::DISPLAY_WIDTH, Self::DISPLAY_HEIGHT));
        let (video, feed) = Track::video(
            "Screen 1",
            TrackSettings {
                width: Some(width),
                height: Some(height),
                frame_rate: Some(constraints.frame_rate as f64),
                device_id: None,
            },
        );
        feed.publish(VideoFrame::blank(width, height).expect("display frame size"));

        let mut tracks = vec![video];
        if constraints.system_audio {
            let (audio, _feed) = Track::audio("System audio", TrackSettings::default());
            tracks.push(audio);
        }

        let source = LiveSource::new(tracks);
        self.displays.lock().push(source.clone());
        Ok(source)
    }

    async fn request_microphone(
        &self,
        constraints: &MicrophoneConstraints,
    ) -> CaptureResult<LiveSource> {
        self.microphone_constraints.lock().push(constraints.clone());
        if let Some(error) = self.microphone_error.lock().clone() {
            return Err(error);
        }

        let (audio, _feed) = Track::audio(
            "Built-in Microphone",
            TrackSettings {
                device_id: Some(Self::MICROPHONE_DEVICE.to_string()),
                ..Default::default()
            },
        );
        let source = LiveSource::new(vec![audio]);
        self.microphones.lock().push(source.clone());
        Ok(source)
    }
}

/// Encoder emitting a small numbered chunk every flush interval
pub struct FakeEncoder {
    paused: Arc<AtomicBool>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    pause_calls: AtomicUsize,
    resume_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl FakeEncoder {
    const CHUNK_SIZE: usize = 32;

    fn new() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
            stop_tx: Mutex::new(None),
            pause_calls: AtomicUsize::new(0),
            resume_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        }
    }

    pub fn pause_calls(&self) -> usize {
        self.pause_calls.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> usize {
        self.resume_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl Encoder for FakeEncoder {
    fn start(&self, flush_interval: Duration) -> RecordingResult<mpsc::UnboundedReceiver<EncoderEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = oneshot::channel();
        *self.stop_tx.lock() = Some(stop_tx);
        let paused = self.paused.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.tick().await;
            let mut seq: u8 = 0;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if paused.load(Ordering::SeqCst) {
                            continue;
                        }
                        seq = seq.wrapping_add(1);
                        if tx.send(EncoderEvent::Chunk(vec![seq; Self::CHUNK_SIZE])).is_err() {
                            return;
                        }
                    }
                }
            }
            let _ = tx.send(EncoderEvent::Chunk(vec![0xff; Self::CHUNK_SIZE / 2]));
            let _ = tx.send(EncoderEvent::Stopped);
        });

        Ok(rx)
    }

    fn pause(&self) {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

/// Encoder factory recording what it was asked to create
#[derive(Default)]
pub struct FakeEncoderFactory {
    /// None supports every MIME type
    supported: Mutex<Option<Vec<String>>>,
    fail_create: AtomicBool,
    encoders: Mutex<Vec<Arc<FakeEncoder>>>,
    sources: Mutex<Vec<LiveSource>>,
    configs: Mutex<Vec<EncoderConfig>>,
}

impl FakeEncoderFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_supported(&self, mime_types: &[&str]) {
        *self.supported.lock() = Some(mime_types.iter().map(|m| m.to_string()).collect());
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn last_encoder(&self) -> Option<Arc<FakeEncoder>> {
        self.encoders.lock().last().cloned()
    }

    pub fn last_source(&self) -> Option<LiveSource> {
        self.sources.lock().last().cloned()
    }

    pub fn configs(&self) -> Vec<EncoderConfig> {
        self.configs.lock().clone()
    }
}

#[async_trait]
impl EncoderFactory for FakeEncoderFactory {
    fn supports_mime(&self, mime_type: &str) -> bool {
        match self.supported.lock().as_ref() {
            Some(supported) => supported.iter().any(|m| m == mime_type),
            None => true,
        }
    }

    async fn create(&self, source: &LiveSource, config: &EncoderConfig) -> RecordingResult<Arc<dyn Encoder>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RecordingError::EncodingError("encoder unavailable".to_string()));
        }
        let encoder = Arc::new(FakeEncoder::new());
        self.encoders.lock().push(encoder.clone());
        self.sources.lock().push(source.clone());
        self.configs.lock().push(config.clone());
        Ok(encoder)
    }
}

#[derive(Debug, Default)]
struct MemoryFile {
    data: Vec<u8>,
    write_sizes: Vec<usize>,
    writes: usize,
    closed: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<String, MemoryFile>,
    write_delays: Vec<Duration>,
    fail_write: Option<usize>,
    fail_close: bool,
    fail_create: bool,
}

/// Directory keeping its files in memory, with injectable latency and failures
#[derive(Debug)]
pub struct MemoryDirectory {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDirectory {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        })
    }

    /// Delay for the n-th write of each file
    pub fn set_write_delays(&self, delays: Vec<Duration>) {
        self.state.lock().write_delays = delays;
    }

    /// Fail the write with this index (0-based, per file)
    pub fn fail_write(&self, index: usize) {
        self.state.lock().fail_write = Some(index);
    }

    pub fn fail_close(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    /// Sizes of the successful writes, in completion order
    pub fn write_sizes(&self, file: &str) -> Vec<usize> {
        self.state
            .lock()
            .files
            .get(file)
            .map(|f| f.write_sizes.clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self, file: &str) -> bool {
        self.state.lock().files.get(file).is_some_and(|f| f.closed)
    }

    pub fn file_contents(&self, file: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(file).map(|f| f.data.clone())
    }
}

#[async_trait]
impl DirectoryHandle for MemoryDirectory {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn create_file(&self, name: &str) -> StorageResult<Box<dyn FileHandle>> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "directory is read-only",
            )));
        }
        state.files.insert(name.to_string(), MemoryFile::default());
        Ok(Box::new(MemoryFileHandle {
            name: name.to_string(),
            state: self.state.clone(),
        }))
    }
}

struct MemoryFileHandle {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl FileHandle for MemoryFileHandle {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn open_writable(&self) -> StorageResult<Box<dyn WritableHandle>> {
        Ok(Box::new(MemoryWritable {
            name: self.name.clone(),
            state: self.state.clone(),
        }))
    }

    async fn read_back(&self) -> StorageResult<StoredContent> {
        let state = self.state.lock();
        let file = state
            .files
            .get(&self.name)
            .ok_or_else(|| StorageError::FinalizeFailure(format!("{} is gone", self.name)))?;
        Ok(StoredContent {
            content: ArtifactContent::Memory(Arc::new(file.data.clone())),
            size_bytes: file.data.len() as u64,
        })
    }
}

struct MemoryWritable {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl WritableHandle for MemoryWritable {
    async fn write(&mut self, data: &[u8]) -> StorageResult<()> {
        let (index, delay) = {
            let mut state = self.state.lock();
            let file = state.files.entry(self.name.clone()).or_default();
            if file.closed {
                return Err(StorageError::Closed);
            }
            let index = file.writes;
            file.writes += 1;
            (index, state.write_delays.get(index).copied())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.fail_write == Some(index) {
            return Err(StorageError::WriteFailure(format!("write {} rejected", index)));
        }
        let file = state.files.entry(self.name.clone()).or_default();
        file.data.extend_from_slice(data);
        file.write_sizes.push(data.len());
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.fail_close {
            return Err(StorageError::FinalizeFailure("disk full".to_string()));
        }
        if let Some(file) = state.files.get_mut(&self.name) {
            file.closed = true;
        }
        Ok(())
    }
}

/// Transcoder reporting half-way progress before finishing or failing
#[derive(Default)]
pub struct FakeTranscoder {
    fail: AtomicBool,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl FakeTranscoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        input: &RecordingArtifact,
        on_progress: ProgressCallback,
    ) -> TranscodeResult<RecordingArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        on_progress(TranscodeProgress::new(500, Some(1000)));

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TranscodeError::Failed("exit status: 1".to_string()));
        }

        let bytes = input.content.read().await?;
        on_progress(TranscodeProgress::complete(Some(1000)));
        Ok(RecordingArtifact::in_memory(mp4_name(&input.name), bytes))
    }
}
