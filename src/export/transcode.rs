//! Transcoder interface and the conversion entry point

use super::types::{TranscodeProgress, TranscodeResult};
use crate::recorder::{RecordingCoordinator, RecordingEvent};
use crate::storage::RecordingArtifact;
use async_trait::async_trait;
use std::sync::Arc;

/// Called with every progress update
pub type ProgressCallback = Arc<dyn Fn(TranscodeProgress) + Send + Sync>;

/// Post-processing of a finished recording
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert `input` to MP4. The input artifact is left untouched.
    async fn transcode(
        &self,
        input: &RecordingArtifact,
        on_progress: ProgressCallback,
    ) -> TranscodeResult<RecordingArtifact>;
}

/// Convert an artifact, reporting progress and failure as recorder events.
///
/// On failure the original artifact stays usable and a warning is emitted.
pub async fn convert_artifact(
    transcoder: &dyn Transcoder,
    artifact: &RecordingArtifact,
    recorder: &RecordingCoordinator,
) -> TranscodeResult<RecordingArtifact> {
    tracing::info!("Converting {} to MP4", artifact.name);

    let events = recorder.clone();
    let name = artifact.name.clone();
    let on_progress: ProgressCallback = Arc::new(move |progress: TranscodeProgress| {
        if let Some(ratio) = progress.ratio {
            events.emit(RecordingEvent::ConversionProgress {
                name: name.clone(),
                ratio,
            });
        }
    });

    match transcoder.transcode(artifact, on_progress).await {
        Ok(converted) => {
            tracing::info!("Converted {} to {}", artifact.name, converted.name);
            Ok(converted)
        }
        Err(e) => {
            tracing::warn!("Conversion of {} failed: {}", artifact.name, e);
            recorder.emit(RecordingEvent::Warning(format!(
                "MP4 conversion failed, the original {} is kept: {}",
                artifact.name, e
            )));
            Err(e)
        }
    }
}
