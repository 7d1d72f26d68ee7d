//! Schedule engine
//!
//! Keeps any number of recording windows, each with its own options
//! snapshot, optional pre-armed display source and optional destination.
//! Two fire-once timers per schedule start and stop a recorder session
//! tagged with the schedule id.
//!
//! Removing a schedule from the map is what cancels it: a timer that
//! already woke up looks the schedule up under the lock and finds nothing.

use super::types::{
    describe_options, Schedule, ScheduleError, ScheduleId, ScheduleResult, ScheduleSummary,
    ScheduleWindow,
};
use crate::capture::{CaptureError, LiveSource, Track};
use crate::recorder::{CaptureOptions, RecordingCoordinator, RecordingError, RecordingEvent, SessionRequest};
use crate::storage::DirectoryHandle;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy)]
enum Fire {
    Start,
    Stop,
}

struct Inner {
    recorder: RecordingCoordinator,
    schedules: Mutex<HashMap<ScheduleId, Schedule>>,
    /// Source picked before any schedule existed
    preselected: Mutex<Option<LiveSource>>,
}

/// Runs recordings inside scheduled time windows
#[derive(Clone)]
pub struct ScheduleEngine {
    inner: Arc<Inner>,
}

impl ScheduleEngine {
    pub fn new(recorder: RecordingCoordinator) -> Self {
        Self {
            inner: Arc::new(Inner {
                recorder,
                schedules: Mutex::new(HashMap::new()),
                preselected: Mutex::new(None),
            }),
        }
    }

    pub fn recorder(&self) -> &RecordingCoordinator {
        &self.inner.recorder
    }

    /// Add a schedule and arm its timers.
    ///
    /// The globally pre-selected source, if any, moves to the new schedule,
    /// and the current default directory becomes its destination.
    pub fn add(&self, window: ScheduleWindow, options: CaptureOptions) -> ScheduleResult<ScheduleId> {
        if window.end <= window.start {
            return Err(ScheduleError::InvalidWindow {
                start: window.start,
                end: window.end,
            });
        }
        let recorder = &self.inner.recorder;
        options.validate(recorder.config().min_crop_size)?;

        let id = ScheduleId::new();
        let preselected = self.inner.preselected.lock().take();
        let destinations = recorder.destinations();
        if let Some(directory) = destinations.default_directory() {
            destinations.set_override(id, directory);
        }

        let (to_start, to_stop) = window.delays_from(Utc::now());
        tracing::info!(
            "Added schedule {} ({} .. {}), starts in {:?}, stops in {:?}",
            id,
            window.start,
            window.end,
            to_start,
            to_stop
        );

        self.inner
            .schedules
            .lock()
            .insert(id, Schedule::new(window, options, preselected));

        let start_timer = self.arm(id, to_start, Fire::Start);
        let stop_timer = self.arm(id, to_stop, Fire::Stop);
        if let Some(schedule) = self.inner.schedules.lock().get_mut(&id) {
            schedule.start_timer = Some(start_timer);
            schedule.stop_timer = Some(stop_timer);
        }

        recorder.emit(RecordingEvent::SchedulesChanged);
        Ok(id)
    }

    fn arm(&self, id: ScheduleId, delay: Duration, fire: Fire) -> AbortHandle {
        let engine = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::debug!("Schedule {} {:?} timer fired", id, fire);
            // Run detached so aborting the timer can never interrupt a firing
            match fire {
                Fire::Start => tokio::spawn(engine.fire_start(id)),
                Fire::Stop => tokio::spawn(async move { engine.fire_stop(id) }),
            };
        });
        timer.abort_handle()
    }

    async fn fire_start(self, id: ScheduleId) {
        let claimed = {
            let mut schedules = self.inner.schedules.lock();
            match schedules.get_mut(&id) {
                Some(schedule) if !schedule.started => {
                    schedule.started = true;
                    schedule.start_timer = None;
                    Some((schedule.options.clone(), schedule.preselected.take()))
                }
                _ => None,
            }
        };
        let Some((options, preselected)) = claimed else {
            tracing::debug!("Schedule {} is gone, nothing to start", id);
            return;
        };

        let recorder = &self.inner.recorder;
        if recorder.is_active() {
            self.skip_overlap(id, preselected);
            return;
        }

        let display = match preselected {
            Some(source) if source.video_track().is_some_and(Track::is_live) => source,
            stale => {
                if let Some(source) = stale {
                    tracing::info!("Pre-armed source of schedule {} has ended", id);
                    source.stop();
                }
                match recorder
                    .acquisition()
                    .acquire_display(&options.display_constraints())
                    .await
                {
                    Ok(source) => source,
                    Err(e) => {
                        self.report_start_failure(id, &ScheduleError::Capture(e));
                        return;
                    }
                }
            }
        };

        let still_scheduled = self.inner.schedules.lock().contains_key(&id);
        if !still_scheduled {
            tracing::info!("Schedule {} was removed while acquiring", id);
            display.stop();
            return;
        }

        let request = SessionRequest::scheduled(options, id, Some(display.clone()));
        match recorder.start(request).await {
            Ok(()) => {
                let still_scheduled = self.inner.schedules.lock().contains_key(&id);
                if !still_scheduled {
                    tracing::info!("Schedule {} was removed while starting, stopping", id);
                    recorder.request_stop_for(&id);
                }
            }
            Err(RecordingError::AlreadyActive) => self.skip_overlap(id, Some(display)),
            Err(e) => self.report_start_failure(id, &ScheduleError::Recording(e)),
        }
    }

    /// Another session is active. This run is skipped, not queued.
    fn skip_overlap(&self, id: ScheduleId, preselected: Option<LiveSource>) {
        let error = ScheduleError::Overlap(id);
        tracing::warn!("{}", error);

        if let Some(source) = preselected {
            let mut schedules = self.inner.schedules.lock();
            match schedules.get_mut(&id) {
                Some(schedule) => schedule.preselected = Some(source),
                None => source.stop(),
            }
        }
        self.inner.recorder.emit(RecordingEvent::Warning(error.to_string()));
    }

    fn report_start_failure(&self, id: ScheduleId, error: &ScheduleError) {
        let cancelled = matches!(
            error,
            ScheduleError::Capture(CaptureError::UserCancelled)
                | ScheduleError::Recording(RecordingError::Capture(CaptureError::UserCancelled))
        );
        if cancelled {
            tracing::info!("Source selection for schedule {} was cancelled", id);
            return;
        }
        tracing::warn!("Schedule {} failed to start: {}", id, error);
        self.inner.recorder.emit(RecordingEvent::Warning(format!(
            "Scheduled recording could not start: {}",
            error
        )));
    }

    fn fire_stop(&self, id: ScheduleId) {
        let removed = self.inner.schedules.lock().remove(&id);
        let Some(mut schedule) = removed else {
            tracing::debug!("Schedule {} is gone, nothing to stop", id);
            return;
        };
        schedule.stop_timer = None;
        tracing::info!("Schedule {} window ended", id);
        self.release(id, schedule);
    }

    /// Tear down a schedule already taken out of the map
    fn release(&self, id: ScheduleId, mut schedule: Schedule) {
        schedule.teardown();

        let recorder = &self.inner.recorder;
        // The session's finalization consumes the override when it owns one
        if !recorder.request_stop_for(&id) {
            recorder.destinations().remove_override(&id);
        }
        recorder.emit(RecordingEvent::SchedulesChanged);
    }

    /// Cancel a schedule: timers cleared, pre-armed source released, and
    /// its session stopped if it is running.
    pub fn cancel(&self, id: &ScheduleId) -> ScheduleResult<()> {
        let removed = self.inner.schedules.lock().remove(id);
        let schedule = removed.ok_or(ScheduleError::NotFound(*id))?;
        tracing::info!("Cancelled schedule {}", id);
        self.release(*id, schedule);
        Ok(())
    }

    /// Acquire a display source for a schedule ahead of its start
    pub async fn preselect(&self, id: &ScheduleId) -> ScheduleResult<()> {
        let options = self
            .inner
            .schedules
            .lock()
            .get(id)
            .map(|schedule| schedule.options.clone())
            .ok_or(ScheduleError::NotFound(*id))?;

        let source = self
            .inner
            .recorder
            .acquisition()
            .acquire_display(&options.display_constraints())
            .await?;

        let previous = {
            let mut schedules = self.inner.schedules.lock();
            match schedules.get_mut(id) {
                Some(schedule) => schedule.preselected.replace(source),
                None => {
                    source.stop();
                    return Err(ScheduleError::NotFound(*id));
                }
            }
        };
        if let Some(previous) = previous {
            previous.stop();
        }

        tracing::info!("Source pre-selected for schedule {}", id);
        self.inner.recorder.emit(RecordingEvent::SchedulesChanged);
        Ok(())
    }

    /// Acquire a display source before creating a schedule. The next
    /// schedule added takes it over.
    pub async fn preselect_global(&self, options: &CaptureOptions) -> ScheduleResult<()> {
        let source = self
            .inner
            .recorder
            .acquisition()
            .acquire_display(&options.display_constraints())
            .await?;

        if let Some(previous) = self.inner.preselected.lock().replace(source) {
            previous.stop();
        }
        tracing::info!("Source pre-selected for the next schedule");
        Ok(())
    }

    pub fn has_global_preselection(&self) -> bool {
        self.inner
            .preselected
            .lock()
            .as_ref()
            .is_some_and(LiveSource::is_live)
    }

    /// Route a schedule's recording to `directory`
    pub fn set_directory(&self, id: &ScheduleId, directory: Arc<dyn DirectoryHandle>) -> ScheduleResult<()> {
        if !self.inner.schedules.lock().contains_key(id) {
            return Err(ScheduleError::NotFound(*id));
        }
        tracing::info!("Schedule {} saves to {}", id, directory.name());
        self.inner.recorder.destinations().set_override(*id, directory);
        self.inner.recorder.emit(RecordingEvent::SchedulesChanged);
        Ok(())
    }

    /// Destination for manual recordings and schedules without their own
    pub fn set_default_directory(&self, directory: Option<Arc<dyn DirectoryHandle>>) {
        self.inner.recorder.destinations().set_default(directory);
    }

    /// All schedules, earliest start first
    pub fn list(&self) -> Vec<ScheduleSummary> {
        let destinations = self.inner.recorder.destinations();
        let mut summaries: Vec<ScheduleSummary> = self
            .inner
            .schedules
            .lock()
            .iter()
            .map(|(id, schedule)| ScheduleSummary {
                id: *id,
                start: schedule.window.start,
                end: schedule.window.end,
                options: schedule.options.clone(),
                source_ready: schedule
                    .preselected
                    .as_ref()
                    .is_some_and(LiveSource::is_live),
                directory: destinations.override_for(id).map(|d| d.name()),
                started: schedule.started,
                description: describe_options(&schedule.options),
            })
            .collect();

        summaries.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));
        summaries
    }

    pub fn len(&self) -> usize {
        self.inner.schedules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::SessionState;
    use crate::storage::RecordingArtifact;
    use crate::testing::{self, MemoryDirectory, TestRig};
    use tokio::sync::broadcast;

    fn window_ms(from_ms: i64, to_ms: i64) -> ScheduleWindow {
        let now = Utc::now();
        ScheduleWindow::new(
            now + chrono::Duration::milliseconds(from_ms),
            now + chrono::Duration::milliseconds(to_ms),
        )
        .unwrap()
    }

    fn artifacts(events: &mut broadcast::Receiver<RecordingEvent>) -> Vec<(RecordingArtifact, Option<ScheduleId>)> {
        testing::drain_events(events)
            .into_iter()
            .filter_map(|event| match event {
                RecordingEvent::ArtifactProduced { artifact, owner } => Some((artifact, owner)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_invalid_window_is_rejected() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());
        let now = Utc::now();
        let window = ScheduleWindow { start: now, end: now };

        assert!(matches!(
            engine.add(window, CaptureOptions::default()),
            Err(ScheduleError::InvalidWindow { .. })
        ));
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_window_produces_exactly_one_artifact() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());
        let mut events = rig.recorder.subscribe();

        let id = engine.add(window_ms(0, 500), CaptureOptions::default()).unwrap();

        testing::wait_for_state(&rig.recorder, SessionState::Recording).await;
        assert_eq!(rig.recorder.owner(), Some(id));

        let artifact = testing::next_artifact(&mut events).await;
        assert!(artifact.size_bytes > 0);
        assert_eq!(rig.recorder.state(), SessionState::Idle);
        assert!(engine.is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(artifacts(&mut events).is_empty());
        assert_eq!(rig.backend.display_requests(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start_never_records() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());
        let mut events = rig.recorder.subscribe();

        let id = engine.add(window_ms(150, 300), CaptureOptions::default()).unwrap();
        engine.cancel(&id).unwrap();

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(rig.backend.display_requests(), 0);
        assert_eq!(rig.recorder.state(), SessionState::Idle);
        assert!(artifacts(&mut events).is_empty());
        assert!(matches!(engine.cancel(&id), Err(ScheduleError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_overlapping_window_is_skipped() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());
        let mut events = rig.recorder.subscribe();

        rig.recorder
            .start(SessionRequest::manual(CaptureOptions::default()))
            .await
            .unwrap();
        engine.add(window_ms(0, 150), CaptureOptions::default()).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(rig.recorder.state(), SessionState::Recording);
        assert_eq!(rig.recorder.owner(), None);
        assert_eq!(rig.backend.display_requests(), 1);

        let warned = testing::drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, RecordingEvent::Warning(msg) if msg.contains("skipped")));
        assert!(warned);
        assert!(engine.is_empty());

        rig.recorder.stop().unwrap();
        testing::next_artifact(&mut events).await;
    }

    #[tokio::test]
    async fn test_session_started_during_acquisition_keeps_source_armed() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());
        let mut events = rig.recorder.subscribe();
        rig.backend.set_display_delay(Duration::from_millis(100));

        let id = engine.add(window_ms(50, 5_000), CaptureOptions::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        rig.recorder
            .start(SessionRequest::manual(CaptureOptions::default()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(rig.recorder.owner(), None);
        assert_eq!(rig.backend.display_requests(), 2);
        let summary = engine.list().pop().unwrap();
        assert_eq!(summary.id, id);
        assert!(summary.source_ready);
        assert!(testing::drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, RecordingEvent::Warning(msg) if msg.contains("skipped"))));

        engine.cancel(&id).unwrap();
        assert!(rig.encoders.last_source().unwrap().video_track().unwrap().is_live());
        rig.recorder.stop().unwrap();
        testing::next_artifact(&mut events).await;
    }

    #[tokio::test]
    async fn test_list_is_sorted_by_start() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());

        let later = engine.add(window_ms(60_000, 70_000), CaptureOptions::default()).unwrap();
        let soon = engine.add(window_ms(10_000, 20_000), CaptureOptions::default()).unwrap();
        let middle = engine.add(window_ms(30_000, 40_000), CaptureOptions::default()).unwrap();

        let ids: Vec<ScheduleId> = engine.list().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![soon, middle, later]);
        assert_eq!(engine.list()[0].description, "Full screen • 30 FPS • Auto • Manual");

        for id in ids {
            engine.cancel(&id).unwrap();
        }
        assert!(engine.list().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_recording_stops_exactly_once() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());
        let mut events = rig.recorder.subscribe();

        let id = engine.add(window_ms(0, 5_000), CaptureOptions::default()).unwrap();
        testing::wait_for_state(&rig.recorder, SessionState::Recording).await;

        engine.cancel(&id).unwrap();
        let artifact = testing::next_artifact(&mut events).await;
        assert!(artifact.size_bytes > 0);

        let _ = rig.recorder.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rig.encoders.last_encoder().unwrap().stop_calls(), 1);
        assert!(artifacts(&mut events).is_empty());
        assert_eq!(rig.recorder.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_preselect_replaces_previous_source() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());
        let id = engine.add(window_ms(60_000, 70_000), CaptureOptions::default()).unwrap();

        engine.preselect(&id).await.unwrap();
        let first = rig.backend.last_display().unwrap();
        engine.preselect(&id).await.unwrap();
        let second = rig.backend.last_display().unwrap();

        assert!(!first.is_live());
        assert!(second.is_live());
        assert!(engine.list()[0].source_ready);

        engine.cancel(&id).unwrap();
        assert!(!second.is_live());
    }

    #[tokio::test]
    async fn test_preselect_unknown_schedule() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());
        assert!(matches!(
            engine.preselect(&ScheduleId::new()).await,
            Err(ScheduleError::NotFound(_))
        ));
        assert_eq!(rig.backend.display_requests(), 0);
    }

    #[tokio::test]
    async fn test_preselected_source_is_used_at_start() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());
        let mut events = rig.recorder.subscribe();

        let id = engine.add(window_ms(150, 400), CaptureOptions::default()).unwrap();
        engine.preselect(&id).await.unwrap();
        let preselected = rig.backend.last_display().unwrap();

        testing::next_artifact(&mut events).await;
        assert_eq!(rig.backend.display_requests(), 1);
        let encoded = rig.encoders.last_source().unwrap();
        assert!(encoded
            .video_track()
            .unwrap()
            .same_track(preselected.video_track().unwrap()));
    }

    #[tokio::test]
    async fn test_ended_preselected_source_is_replaced() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());
        let mut events = rig.recorder.subscribe();

        let id = engine.add(window_ms(150, 400), CaptureOptions::default()).unwrap();
        engine.preselect(&id).await.unwrap();
        let stale = rig.backend.last_display().unwrap();
        stale.stop();

        testing::next_artifact(&mut events).await;
        assert_eq!(rig.backend.display_requests(), 2);
        let encoded = rig.encoders.last_source().unwrap();
        assert!(!encoded
            .video_track()
            .unwrap()
            .same_track(stale.video_track().unwrap()));
    }

    #[tokio::test]
    async fn test_acquisition_failure_skips_run() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());
        let mut events = rig.recorder.subscribe();
        rig.backend
            .fail_display(Some(CaptureError::PermissionDenied("denied".into())));

        engine.add(window_ms(0, 200), CaptureOptions::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;

        let events = testing::drain_events(&mut events);
        assert!(events.iter().any(|e| matches!(e, RecordingEvent::Warning(_))));
        assert!(!events
            .iter()
            .any(|e| matches!(e, RecordingEvent::ArtifactProduced { .. })));
        assert_eq!(rig.recorder.state(), SessionState::Idle);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_directory_receives_recording() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());
        let mut events = rig.recorder.subscribe();
        let fallback = MemoryDirectory::new("default");
        let own = MemoryDirectory::new("own");
        engine.set_default_directory(Some(fallback.clone()));

        let options = CaptureOptions {
            incremental_persistence: true,
            ..Default::default()
        };
        let id = engine.add(window_ms(100, 400), options).unwrap();
        assert_eq!(engine.list()[0].directory.as_deref(), Some("default"));
        engine.set_directory(&id, own.clone()).unwrap();

        let artifact = testing::next_artifact(&mut events).await;
        assert!(own.file_contents(&artifact.name).is_some());
        assert!(fallback.file_contents(&artifact.name).is_none());
        assert!(rig.destinations.override_for(&id).is_none());
    }

    #[tokio::test]
    async fn test_global_preselection_moves_to_next_schedule() {
        let rig = TestRig::new();
        let engine = ScheduleEngine::new(rig.recorder.clone());

        engine.preselect_global(&CaptureOptions::default()).await.unwrap();
        assert!(engine.has_global_preselection());

        let id = engine.add(window_ms(60_000, 70_000), CaptureOptions::default()).unwrap();
        assert!(!engine.has_global_preselection());
        assert!(engine.list()[0].source_ready);

        engine.cancel(&id).unwrap();
        assert!(!rig.backend.last_display().unwrap().is_live());
    }
}
