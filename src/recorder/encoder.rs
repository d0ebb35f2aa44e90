//! Encoder seam
//!
//! The recorder drives an [`EncodeSession`] from its serial pipeline thread.
//! Backends decide how buffers become a media container.

use super::state::{AudioTrackSpec, PixelFormat, VideoTrackSpec};
use crate::clock::CanonicalTime;
use crate::utils::error::RecorderResult;
use bytes::Bytes;
use std::path::Path;

/// A raw video frame; cloning only bumps a reference count
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl VideoFrame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            pixel_format,
        }
    }

    /// Whether the buffer holds exactly one frame of the declared format
    pub fn is_complete(&self) -> bool {
        self.data.len() == self.pixel_format.frame_size(self.width, self.height)
    }
}

/// A buffer of interleaved PCM audio
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub data: Bytes,
    /// Canonical time of the first sample
    pub time: CanonicalTime,
}

impl AudioBuffer {
    pub fn new(data: impl Into<Bytes>, time: CanonicalTime) -> Self {
        Self {
            data: data.into(),
            time,
        }
    }
}

/// Creates encode sessions for prepared recordings
pub trait EncoderBackend: Send + Sync {
    /// Allocate track writers for a container at `output`
    ///
    /// May block for hundreds of milliseconds; only called on the session
    /// pipeline.
    fn open(
        &self,
        output: &Path,
        video: Option<&VideoTrackSpec>,
        audio: Option<&AudioTrackSpec>,
    ) -> RecorderResult<Box<dyn EncodeSession>>;
}

/// One open media container
pub trait EncodeSession: Send {
    fn append_video(&mut self, frame: &VideoFrame, time: CanonicalTime) -> RecorderResult<()>;

    fn append_audio(&mut self, buffer: &AudioBuffer) -> RecorderResult<()>;

    /// Finalize the container
    fn finish(self: Box<Self>) -> RecorderResult<()>;

    /// Stop without producing a valid container
    fn abort(self: Box<Self>);
}
