//! Recording system module
//!
//! This module implements the session recorder:
//! - SessionRecorder state machine with a serial pipeline thread
//! - EncoderBackend seam and the ffmpeg-backed implementation
//! - Frame metadata and time-base side files
//! - Delegate and broadcast notifications

pub mod delegate;
pub mod encoder;
pub mod ffmpeg;
pub mod metadata;
pub mod paths;
pub mod session;
pub mod state;

pub use delegate::{RecorderDelegate, RecorderEvent};
pub use encoder::{AudioBuffer, EncodeSession, EncoderBackend, VideoFrame};
pub use ffmpeg::FfmpegBackend;
pub use metadata::{CameraIntrinsics, CameraParams, FrameMetadata};
pub use paths::SessionPaths;
pub use session::{RecorderStats, SessionRecorder};
pub use state::{
    AudioTrackSpec, PixelFormat, RecorderOptions, RecorderState, RecordingOutput, SessionConfig,
    VideoTrackSpec,
};
