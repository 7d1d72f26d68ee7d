//! FFmpeg-based MP4 conversion
//!
//! Runs `ffmpeg` as a child process and follows its `-progress pipe:1`
//! output to report how far the conversion got.

use super::transcode::{ProgressCallback, Transcoder};
use super::types::{mp4_name, TranscodeError, TranscodeProgress, TranscodeResult};
use crate::storage::{ArtifactContent, RecordingArtifact};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// One parsed line of ffmpeg's `-progress` output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressLine {
    /// Output time written so far (milliseconds)
    OutTime(u64),
    /// ffmpeg finished writing
    End,
}

/// Parse a `key=value` line of `-progress` output
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        // Both are microseconds, despite the name of the second
        "out_time_us" | "out_time_ms" => value.parse::<u64>().ok().map(|us| ProgressLine::OutTime(us / 1000)),
        "progress" if value == "end" => Some(ProgressLine::End),
        _ => None,
    }
}

/// ffmpeg arguments for converting `input` to H.264/AAC MP4
pub fn build_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Paths of one conversion
#[derive(Debug)]
struct PreparedInput {
    input: PathBuf,
    output: PathBuf,
    /// `input` is a temporary copy owned by the conversion
    spilled: bool,
}

impl PreparedInput {
    async fn cleanup(&self) {
        if !self.spilled {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(&self.input).await {
            tracing::warn!("Failed to remove {:?}: {}", self.input, e);
        }
    }
}

/// Converts recordings with a local ffmpeg install
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    /// Where in-memory recordings are spilled and their output written
    work_dir: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            work_dir: work_dir.into(),
        }
    }

    /// Use specific ffmpeg/ffprobe binaries
    pub fn with_binaries(mut self, ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    /// Input and output paths for `artifact`. In-memory content is written
    /// to `work_dir` first.
    async fn prepare(&self, artifact: &RecordingArtifact) -> TranscodeResult<PreparedInput> {
        let output_name = mp4_name(&artifact.name);
        let (input, output, spilled) = match &artifact.content {
            ArtifactContent::File(path) => {
                let dir = path.parent().unwrap_or(&self.work_dir);
                (path.clone(), dir.join(output_name), false)
            }
            ArtifactContent::Memory(_) => (
                self.work_dir.join(&artifact.name),
                self.work_dir.join(output_name),
                true,
            ),
        };
        if input == output {
            return Err(TranscodeError::Failed(format!(
                "{} would overwrite its own input",
                output.display()
            )));
        }

        if let ArtifactContent::Memory(bytes) = &artifact.content {
            tokio::fs::create_dir_all(&self.work_dir).await?;
            tokio::fs::write(&input, bytes.as_slice()).await?;
        }
        Ok(PreparedInput {
            input,
            output,
            spilled,
        })
    }

    /// Duration of the input in milliseconds, if ffprobe can tell
    async fn probe_duration_ms(&self, input: &Path) -> Option<u64> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "csv=p=0"])
            .arg(input)
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }
        let secs: f64 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
        (secs.is_finite() && secs > 0.0).then(|| (secs * 1000.0) as u64)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &RecordingArtifact,
        on_progress: ProgressCallback,
    ) -> TranscodeResult<RecordingArtifact> {
        let prepared = self.prepare(input).await?;
        let result = self.run(&prepared, on_progress).await;
        prepared.cleanup().await;

        let size_bytes = result?;
        Ok(RecordingArtifact {
            name: mp4_name(&input.name),
            size_bytes,
            content: ArtifactContent::File(prepared.output),
        })
    }
}

impl FfmpegTranscoder {
    /// Run ffmpeg on `prepared`, returning the output size in bytes
    async fn run(&self, prepared: &PreparedInput, on_progress: ProgressCallback) -> TranscodeResult<u64> {
        let duration_ms = self.probe_duration_ms(&prepared.input).await;
        let args = build_args(&prepared.input, &prepared.output);

        tracing::info!("Starting FFmpeg conversion: {:?}", args);

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscodeError::Ffmpeg(format!("Failed to start FFmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TranscodeError::Ffmpeg("Failed to capture FFmpeg stdout".to_string()))?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut text).await;
            }
            text
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_progress_line(&line) {
                Some(ProgressLine::OutTime(ms)) => on_progress(TranscodeProgress::new(ms, duration_ms)),
                Some(ProgressLine::End) => on_progress(TranscodeProgress::complete(duration_ms)),
                None => {}
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            let detail = stderr.lines().last().unwrap_or("no output").to_string();
            return Err(TranscodeError::Failed(format!("{} ({})", status, detail)));
        }

        Ok(tokio::fs::metadata(&prepared.output).await?.len())
    }
}
