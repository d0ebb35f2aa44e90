//! Entry point for captured data
//!
//! Converts device-domain timestamps to canonical time and forwards buffers
//! to the recorder. Buffers whose timestamps cannot be converted are dropped
//! with a warning; the capture thread never sees an error.

use crate::clock::{ClockConverter, ClockSample};
use crate::inertial::{SensorKind, SensorSample};
use crate::recorder::{AudioBuffer, CameraParams, SessionRecorder, VideoFrame};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cloneable handle given to capture sources
#[derive(Clone)]
pub struct CaptureSink {
    recorder: Arc<SessionRecorder>,
    clock: Arc<ClockConverter>,
    rejected: Arc<AtomicU64>,
}

impl CaptureSink {
    pub fn new(recorder: Arc<SessionRecorder>, clock: Arc<ClockConverter>) -> Self {
        Self {
            recorder,
            clock,
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Buffers dropped because their timestamp could not be converted
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn on_video_frame(&self, frame: VideoFrame, at: ClockSample, params: CameraParams) {
        match self.clock.to_canonical(at) {
            Ok(time) => self.recorder.append_video_frame(frame, time, params),
            Err(e) => self.reject("video frame", e),
        }
    }

    pub fn on_audio_buffer(&self, data: impl Into<Bytes>, at: ClockSample) {
        match self.clock.to_canonical(at) {
            Ok(time) => self.recorder.append_audio_buffer(AudioBuffer::new(data, time)),
            Err(e) => self.reject("audio buffer", e),
        }
    }

    pub fn on_sensor_event(&self, kind: SensorKind, at: ClockSample, values: [f64; 3]) {
        if at.domain() != kind.native_clock() {
            tracing::trace!("{} sample stamped on {:?} clock", kind, at.domain());
        }
        match self.clock.to_canonical(at) {
            Ok(time) => self
                .recorder
                .append_sensor_sample(SensorSample::new(kind, time, values)),
            Err(e) => self.reject("sensor sample", e),
        }
    }

    fn reject(&self, what: &str, error: crate::utils::error::RecorderError) {
        let rejected = self.rejected.fetch_add(1, Ordering::Relaxed) + 1;
        if rejected <= 5 || rejected % 100 == 0 {
            tracing::warn!("Dropping {}: {} ({} rejected so far)", what, error, rejected);
        }
    }
}
