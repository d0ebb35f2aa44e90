//! Capture trait definitions
//!
//! Device-agnostic interface for anything that produces frames, audio or
//! sensor events for a recording.

use super::sink::CaptureSink;
use crate::utils::error::RecorderResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What a capture source produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Camera,
    Microphone,
    Motion,
    Location,
}

/// A device that pushes captured data into a [`CaptureSink`]
///
/// Sources call the sink from their own capture threads; the sink never
/// blocks them.
#[async_trait]
pub trait CaptureSource: Send {
    /// Stable identifier, used in logs
    fn id(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Begin delivering data to `sink`
    async fn start(&mut self, sink: CaptureSink) -> RecorderResult<()>;

    /// Stop delivering data; the sink is released
    async fn stop(&mut self) -> RecorderResult<()>;

    fn is_running(&self) -> bool;
}
