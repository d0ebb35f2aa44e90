//! Capture sources
//!
//! Sources push frames, audio and sensor events through a [`CaptureSink`],
//! which stamps them on the canonical timebase and hands them to the
//! recorder.

pub mod sink;
pub mod traits;

pub use sink::CaptureSink;
pub use traits::{CaptureSource, SourceKind};
