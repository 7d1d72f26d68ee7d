//! Rectangular crop of a live video track
//!
//! The crop rectangle is picked on a scaled-down preview, so it is first
//! mapped to native coordinates. A render task then samples the newest
//! input frame at the target frame rate and publishes the cropped raster on
//! a new video track.

use super::{ComposedSource, CompositorError, CompositorResult};
use crate::capture::{FrameFeed, LiveSource, Track, TrackSettings, VideoFrame};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Smallest accepted crop side, in preview units
pub const MIN_CROP_SIZE: f64 = 10.0;

/// Largest cropped output side, in pixels
pub const MAX_OUTPUT_SIDE: u32 = 16_384;

/// A crop rectangle in preview coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropArea {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Size of the preview the rectangle was drawn on
    pub preview_width: f64,
    pub preview_height: f64,
}

impl CropArea {
    /// Check the rectangle is usable, rejecting sides below `min_size`
    pub fn validate(&self, min_size: f64) -> CompositorResult<()> {
        if self.width < min_size || self.height < min_size {
            return Err(CompositorError::CropTooSmall {
                width: self.width,
                height: self.height,
                min: min_size,
            });
        }
        self.check_geometry()
    }

    fn check_geometry(&self) -> CompositorResult<()> {
        let values = [
            self.x,
            self.y,
            self.width,
            self.height,
            self.preview_width,
            self.preview_height,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CompositorError::InvalidCrop("non-finite coordinate".into()));
        }
        if self.preview_width <= 0.0 || self.preview_height <= 0.0 {
            return Err(CompositorError::InvalidCrop("preview size must be positive".into()));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(CompositorError::InvalidCrop("crop size must be positive".into()));
        }
        if self.x < 0.0 || self.y < 0.0 {
            return Err(CompositorError::InvalidCrop("crop origin is negative".into()));
        }
        if self.x + self.width > self.preview_width || self.y + self.height > self.preview_height
        {
            return Err(CompositorError::InvalidCrop(format!(
                "crop {}x{} at ({}, {}) exceeds the {}x{} preview",
                self.width, self.height, self.x, self.y, self.preview_width, self.preview_height
            )));
        }
        Ok(())
    }
}

/// A crop rectangle mapped onto the native video size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropGeometry {
    source_x: f64,
    source_y: f64,
    source_width: f64,
    source_height: f64,
    pub output_width: u32,
    pub output_height: u32,
}

impl CropGeometry {
    /// Map `area` onto a video of the given native size. An unknown native
    /// size is taken to equal the preview size.
    ///
    /// The output never exceeds the native size or [`MAX_OUTPUT_SIDE`].
    pub fn new(area: &CropArea, native_width: Option<u32>, native_height: Option<u32>) -> Self {
        let native_width = native_width.map(f64::from).unwrap_or(area.preview_width);
        let native_height = native_height.map(f64::from).unwrap_or(area.preview_height);
        let max_width = native_width.min(f64::from(MAX_OUTPUT_SIDE));
        let max_height = native_height.min(f64::from(MAX_OUTPUT_SIDE));
        let scale_x = native_width / area.preview_width;
        let scale_y = native_height / area.preview_height;

        let source_width = area.width * scale_x;
        let source_height = area.height * scale_y;

        Self {
            source_x: area.x * scale_x,
            source_y: area.y * scale_y,
            source_width,
            source_height,
            output_width: (source_width.min(max_width).round() as u32).max(1),
            output_height: (source_height.min(max_height).round() as u32).max(1),
        }
    }

    /// Draw the cropped region of `frame` into a new output raster.
    ///
    /// Output pixels that fall outside the input stay transparent. Errors
    /// when the frame is malformed or the region misses it entirely.
    pub fn crop_frame(&self, frame: &VideoFrame) -> CompositorResult<VideoFrame> {
        if !frame.is_well_formed() {
            return Err(CompositorError::InvalidCrop(format!(
                "frame buffer does not match {}x{}",
                frame.width, frame.height
            )));
        }
        if self.source_x >= f64::from(frame.width) || self.source_y >= f64::from(frame.height) {
            return Err(CompositorError::InvalidCrop(
                "crop region lies outside the frame".into(),
            ));
        }

        const BPP: usize = VideoFrame::BYTES_PER_PIXEL;
        let mut output = VideoFrame::blank(self.output_width, self.output_height).ok_or_else(|| {
            CompositorError::InvalidCrop(format!(
                "output {}x{} is too large",
                self.output_width, self.output_height
            ))
        })?;
        let step_x = self.source_width / f64::from(self.output_width);
        let step_y = self.source_height / f64::from(self.output_height);

        for oy in 0..self.output_height {
            let sy = (self.source_y + (f64::from(oy) + 0.5) * step_y) as u32;
            if sy >= frame.height {
                break;
            }
            for ox in 0..self.output_width {
                let sx = (self.source_x + (f64::from(ox) + 0.5) * step_x) as u32;
                if sx >= frame.width {
                    break;
                }
                let src = (sy as usize * frame.width as usize + sx as usize) * BPP;
                let dst = (oy as usize * self.output_width as usize + ox as usize) * BPP;
                output.data[dst..dst + BPP].copy_from_slice(&frame.data[src..src + BPP]);
            }
        }

        Ok(output)
    }
}

/// Replace the video track of `source` with a cropped rendition.
///
/// Audio tracks pass through. On error the derived tracks of `source` are
/// released before returning.
pub fn apply_crop(
    mut source: ComposedSource,
    area: &CropArea,
    target_fps: u32,
) -> CompositorResult<ComposedSource> {
    let prepared = area.check_geometry().and_then(|_| {
        if target_fps == 0 {
            return Err(CompositorError::InvalidCrop("frame rate must be positive".into()));
        }
        source
            .video_track()
            .cloned()
            .ok_or(CompositorError::MissingVideo)
    });
    let input = match prepared {
        Ok(input) => input,
        Err(e) => {
            source.release();
            return Err(e);
        }
    };

    let geometry = CropGeometry::new(area, input.settings().width, input.settings().height);
    tracing::info!(
        "Cropping video to {}x{} at {} fps",
        geometry.output_width,
        geometry.output_height,
        target_fps
    );

    let (output, feed) = Track::video(
        "cropped-video",
        TrackSettings {
            width: Some(geometry.output_width),
            height: Some(geometry.output_height),
            frame_rate: Some(f64::from(target_fps)),
            device_id: None,
        },
    );

    let frames = input.subscribe_frames();
    let period = Duration::from_secs_f64(1.0 / f64::from(target_fps));
    let worker = tokio::spawn(render_crop(input.clone(), frames, feed, geometry, period));

    let mut tracks = vec![output.clone()];
    tracks.extend(source.source().audio_tracks().cloned());
    source.replace_source(LiveSource::new(tracks));
    source.adopt(output, worker);

    Ok(source)
}

enum RenderStep {
    Stop,
    Draw,
}

async fn render_crop(
    input: Track,
    frames: Option<watch::Receiver<Option<Arc<VideoFrame>>>>,
    feed: FrameFeed,
    geometry: CropGeometry,
    period: Duration,
) {
    let output = feed.track().clone();
    let Some(frames) = frames else {
        output.stop();
        return;
    };

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let step = tokio::select! {
            _ = output.ended() => RenderStep::Stop,
            _ = input.ended() => RenderStep::Stop,
            _ = ticker.tick() => RenderStep::Draw,
        };

        match step {
            RenderStep::Stop => break,
            RenderStep::Draw => {
                let latest = frames.borrow().clone();
                let Some(frame) = latest else {
                    continue;
                };
                match geometry.crop_frame(&frame) {
                    Ok(cropped) => feed.publish(cropped),
                    // Keep showing the previous frame
                    Err(e) => tracing::trace!("Skipping crop frame: {}", e),
                }
            }
        }
    }

    output.stop();
    tracing::debug!("Crop renderer stopped");
}

/// The user's current crop choice
#[derive(Debug)]
pub struct CropSelection {
    area: RwLock<Option<CropArea>>,
    min_size: f64,
}

impl Default for CropSelection {
    fn default() -> Self {
        Self::new(MIN_CROP_SIZE)
    }
}

impl CropSelection {
    pub fn new(min_size: f64) -> Self {
        Self {
            area: RwLock::new(None),
            min_size,
        }
    }

    /// Replace the selection. A rejected rectangle leaves the previous one in place.
    pub fn set(&self, area: CropArea) -> CompositorResult<()> {
        area.validate(self.min_size)?;
        *self.area.write() = Some(area);
        Ok(())
    }

    pub fn clear(&self) {
        *self.area.write() = None;
    }

    pub fn current(&self) -> Option<CropArea> {
        *self.area.read()
    }

    pub fn min_size(&self) -> f64 {
        self.min_size
    }
}
