//! Recording export module
//!
//! Optional post-processing of finished recordings: conversion to MP4
//! through a pluggable [`Transcoder`], with an FFmpeg implementation.

pub mod ffmpeg;
pub mod transcode;
pub mod types;

pub use ffmpeg::FfmpegTranscoder;
pub use transcode::{convert_artifact, ProgressCallback, Transcoder};
pub use types::{mp4_name, TranscodeError, TranscodeProgress, TranscodeResult};
