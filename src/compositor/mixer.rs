//! Real-time two-input audio mixer
//!
//! Both inputs are queued sample by sample and summed pairwise, so the
//! output is aligned to the sample rather than to buffer boundaries. When
//! one input falls silent for longer than [`MAX_LAG_SECONDS`] the other is
//! emitted alone, as if the quiet input were producing zeros.

use crate::capture::{AudioBuffer, AudioFeed, Track, TrackSettings};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// How far one input may run ahead before it is flushed without its partner
const MAX_LAG_SECONDS: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    First,
    Second,
}

#[derive(Debug, Default)]
struct SampleMixer {
    first: VecDeque<f32>,
    second: VecDeque<f32>,
    format: Option<(u32, u16)>,
}

impl SampleMixer {
    fn push(&mut self, input: Input, buffer: &AudioBuffer) {
        if self.format.is_none() {
            self.format = Some((buffer.sample_rate, buffer.channels));
        }
        let queue = match input {
            Input::First => &mut self.first,
            Input::Second => &mut self.second,
        };
        queue.extend(buffer.samples.iter().copied());
    }

    fn max_lag(&self) -> usize {
        self.format
            .map(|(rate, channels)| (rate as f32 * channels as f32 * MAX_LAG_SECONDS) as usize)
            .unwrap_or(0)
    }

    /// Drain every sample that can be emitted now.
    ///
    /// A closed input counts as permanent silence.
    fn drain(&mut self, first_open: bool, second_open: bool) -> Vec<f32> {
        let paired = self.first.len().min(self.second.len());
        let mut out: Vec<f32> = self
            .first
            .drain(..paired)
            .zip(self.second.drain(..paired))
            .map(|(a, b)| mix_sample(a, b))
            .collect();

        let max_lag = self.max_lag();
        let first_alone = !second_open || self.first.len() > max_lag;
        let second_alone = !first_open || self.second.len() > max_lag;

        if first_alone {
            out.extend(self.first.drain(..).map(|s| mix_sample(s, 0.0)));
        }
        if second_alone {
            out.extend(self.second.drain(..).map(|s| mix_sample(0.0, s)));
        }
        out
    }
}

/// Sum two samples, clamped to the valid range
pub fn mix_sample(a: f32, b: f32) -> f32 {
    (a + b).clamp(-1.0, 1.0)
}

enum MixerStep {
    Stop,
    Buffer(Input, Option<Arc<AudioBuffer>>),
}

/// Mix two audio tracks into a new audio track.
///
/// The mixing task ends when the returned track is stopped or both inputs
/// have closed.
pub fn mix_audio(first: &Track, second: &Track) -> (Track, JoinHandle<()>) {
    let (output, feed) = Track::audio("mixed-audio", TrackSettings::default());
    let inputs = [
        (first.clone(), first.subscribe_audio()),
        (second.clone(), second.subscribe_audio()),
    ];
    let handle = tokio::spawn(run_mixer(inputs, output.clone(), feed));
    (output, handle)
}

/// Next buffer from an input, or None once the input track has ended
async fn next_buffer(
    track: &Track,
    rx: &mut Option<broadcast::Receiver<Arc<AudioBuffer>>>,
) -> Option<Arc<AudioBuffer>> {
    let rx = rx.as_mut()?;
    loop {
        let received = tokio::select! {
            _ = track.ended() => return None,
            received = rx.recv() => received,
        };
        match received {
            Ok(buffer) => return Some(buffer),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Audio mixer fell behind, skipped {} buffers", skipped);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

type MixerInput = (Track, Option<broadcast::Receiver<Arc<AudioBuffer>>>);

async fn run_mixer(inputs: [MixerInput; 2], output: Track, feed: AudioFeed) {
    let [(first_track, mut first), (second_track, mut second)] = inputs;
    let mut mixer = SampleMixer::default();

    loop {
        let step = tokio::select! {
            _ = output.ended() => MixerStep::Stop,
            buffer = next_buffer(&first_track, &mut first), if first.is_some() => MixerStep::Buffer(Input::First, buffer),
            buffer = next_buffer(&second_track, &mut second), if second.is_some() => MixerStep::Buffer(Input::Second, buffer),
            else => MixerStep::Stop,
        };

        match step {
            MixerStep::Stop => break,
            MixerStep::Buffer(input, Some(buffer)) => mixer.push(input, &buffer),
            MixerStep::Buffer(Input::First, None) => first = None,
            MixerStep::Buffer(Input::Second, None) => second = None,
        }

        let samples = mixer.drain(first.is_some(), second.is_some());
        if let (false, Some((sample_rate, channels))) = (samples.is_empty(), mixer.format) {
            feed.push(AudioBuffer {
                sample_rate,
                channels,
                samples,
            });
        }

        if first.is_none() && second.is_none() {
            output.stop();
            break;
        }
    }

    tracing::debug!("Audio mixer stopped");
}
