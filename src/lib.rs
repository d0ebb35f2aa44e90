//! Sensor Recorder - time-aligned video, audio and inertial capture.
//!
//! Records one video track, an optional audio track and a log of inertial
//! sensor samples, all stamped on a single host-monotonic timebase.

pub mod capture;
pub mod clock;
pub mod inertial;
pub mod recorder;
pub mod utils;

pub use capture::{CaptureSink, CaptureSource};
pub use clock::{CanonicalTime, ClockConverter, ClockSample, MediaTime};
pub use inertial::{InertialSampleLog, SensorKind, SensorSample};
pub use recorder::{
    FfmpegBackend, RecorderDelegate, RecorderEvent, RecorderOptions, RecorderState,
    RecordingOutput, SessionConfig, SessionRecorder,
};
pub use utils::error::{RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the default log subscriber
///
/// `RUST_LOG` overrides the default filter. Calling it twice is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sensor_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    tracing::debug!("Sensor recorder v{}", env!("CARGO_PKG_VERSION"));
}
