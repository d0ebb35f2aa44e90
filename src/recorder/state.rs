//! Recording state management
//!
//! Defines the recorder state machine, session configuration and the result
//! of a completed session.

use crate::clock::CanonicalTime;
use crate::utils::error::RecorderResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Current state of the recorder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// No session
    #[default]
    Idle,
    /// Encoder and output files are being allocated
    Preparing,
    /// Prepared, waiting for `start_recording`
    Ready,
    /// Accepting buffers
    Recording,
    /// Draining buffers and finalizing output
    Finishing,
    /// The session failed; `reset` returns to `Idle`
    Failed,
}

impl RecorderState {
    /// Whether a session currently exists
    pub fn is_session_live(&self) -> bool {
        matches!(
            self,
            RecorderState::Preparing
                | RecorderState::Ready
                | RecorderState::Recording
                | RecorderState::Finishing
        )
    }
}

/// Video encoder choice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    Hevc,
}

/// Layout of raw frame bytes handed to the recorder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Nv12,
    Bgra,
    Rgba,
    Yuyv422,
}

impl PixelFormat {
    /// Bytes of one frame at the given size
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Nv12 => pixels * 3 / 2,
            PixelFormat::Bgra | PixelFormat::Rgba => pixels * 4,
            PixelFormat::Yuyv422 => pixels * 2,
        }
    }
}

/// Orientation applied to the recorded video track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoTransform {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
    MirrorHorizontal,
}

/// Video track settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoTrackSpec {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    #[serde(default)]
    pub codec: VideoCodec,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    #[serde(default)]
    pub pixel_format: PixelFormat,
    #[serde(default)]
    pub transform: VideoTransform,
}

/// Audio encoder choice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Aac,
}

/// Sample layout of raw audio buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    S16le,
    F32le,
}

/// Audio track settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrackSpec {
    #[serde(default)]
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(default)]
    pub sample_format: SampleFormat,
    /// Target bitrate in bits per second
    #[serde(default = "default_audio_bitrate")]
    pub bitrate: u32,
}

fn default_audio_bitrate() -> u32 {
    128_000
}

/// Configuration for one recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Media container path; side files are written next to it
    pub destination: PathBuf,

    pub video: Option<VideoTrackSpec>,

    pub audio: Option<AudioTrackSpec>,

    /// Also write gyro rows paired with interpolated accelerometer values
    #[serde(default)]
    pub synchronized_imu: bool,
}

impl SessionConfig {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            video: None,
            audio: None,
            synchronized_imu: false,
        }
    }

    pub fn with_video(mut self, video: VideoTrackSpec) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_audio(mut self, audio: AudioTrackSpec) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn from_json_str(json: &str) -> RecorderResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> RecorderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}

/// Recorder-wide tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderOptions {
    /// Media buffers allowed to wait on the session pipeline before new
    /// ones are dropped
    pub buffer_retention: usize,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            buffer_retention: 120,
        }
    }
}

/// Artifacts and totals of a completed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutput {
    pub session_id: Uuid,

    pub media_path: PathBuf,

    pub frame_metadata_path: PathBuf,

    pub inertial_path: PathBuf,

    pub imu_path: Option<PathBuf>,

    pub timebase_path: PathBuf,

    /// Canonical time of the first written buffer
    pub start_time: Option<CanonicalTime>,

    /// Canonical time of the last written buffer
    pub end_time: Option<CanonicalTime>,

    pub video_frames: u64,

    pub audio_buffers: u64,

    pub sensor_samples: usize,
}

impl RecordingOutput {
    /// Duration between first and last written buffer in milliseconds
    pub fn duration_ms(&self) -> f64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.nanos_since(start) as f64 / 1_000_000.0,
            _ => 0.0,
        }
    }

    /// Every file produced by the session
    pub fn output_files(&self) -> Vec<PathBuf> {
        let mut files = vec![
            self.media_path.clone(),
            self.frame_metadata_path.clone(),
            self.inertial_path.clone(),
            self.timebase_path.clone(),
        ];
        files.extend(self.imu_path.clone());
        files
    }
}
