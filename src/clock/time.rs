//! Time representations
//!
//! `MediaTime` is the rational form timestamps arrive in from capture
//! hardware; `CanonicalTime` is the single nanosecond timebase every
//! consumer outside the converter works with.

use crate::utils::error::{RecorderError, RecorderResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;
pub const MILLIS_PER_SECOND: i64 = 1_000;

/// A rational timestamp of `value / timescale` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    pub const fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    /// Timestamp with nanosecond timescale
    pub const fn from_nanos(nanos: i64) -> Self {
        Self {
            value: nanos,
            timescale: NANOS_PER_SECOND as i32,
        }
    }

    /// A zero or negative timescale has no defined meaning
    pub fn is_valid(&self) -> bool {
        self.timescale > 0
    }

    /// Integer nanoseconds, rounded half away from zero
    pub fn nanoseconds(&self) -> RecorderResult<i64> {
        rescale(self.value, self.timescale, NANOS_PER_SECOND)
    }

    /// Integer milliseconds, rounded half away from zero
    pub fn milliseconds(&self) -> RecorderResult<i64> {
        rescale(self.value, self.timescale, MILLIS_PER_SECOND)
    }

    /// Same instant expressed with another timescale
    pub fn convert_scale(&self, timescale: i32) -> RecorderResult<MediaTime> {
        if timescale <= 0 {
            return Err(RecorderError::InvalidTimestamp(format!(
                "target timescale {} must be positive",
                timescale
            )));
        }
        let value = rescale(self.value, self.timescale, timescale as i64)?;
        Ok(MediaTime::new(value, timescale))
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.timescale)
    }
}

fn rescale(value: i64, from: i32, to: i64) -> RecorderResult<i64> {
    if from <= 0 {
        return Err(RecorderError::InvalidTimestamp(format!(
            "timescale {} must be positive (value {})",
            from, value
        )));
    }

    // i128 keeps value * to exact for every i64 input
    let numerator = value as i128 * to as i128;
    let denominator = from as i128;
    let mut quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if 2 * remainder.abs() >= denominator {
        quotient += numerator.signum();
    }

    i64::try_from(quotient).map_err(|_| {
        RecorderError::InvalidTimestamp(format!(
            "{}/{} does not fit in 64 bits at scale {}",
            value, from, to
        ))
    })
}

/// Nanoseconds on the host monotonic clock
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CanonicalTime(i64);

impl CanonicalTime {
    pub const ZERO: CanonicalTime = CanonicalTime(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    pub fn as_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_SECOND as f64
    }

    /// Signed distance `self - earlier` in nanoseconds
    pub fn nanos_since(&self, earlier: CanonicalTime) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn checked_add_nanos(&self, nanos: i64) -> Option<CanonicalTime> {
        self.0.checked_add(nanos).map(CanonicalTime)
    }
}

impl fmt::Display for CanonicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The clock a raw timestamp was measured on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClockDomain {
    /// Capture device clock for audio/video buffers
    Media,
    /// Host monotonic clock, also used by motion sensors
    HostMonotonic,
    /// Calendar time from auxiliary sensors such as GPS
    WallClock,
}

/// A raw timestamp tagged with its clock domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSample {
    Media(MediaTime),
    HostMonotonic(MediaTime),
    WallClock(DateTime<Utc>),
}

impl ClockSample {
    pub fn domain(&self) -> ClockDomain {
        match self {
            ClockSample::Media(_) => ClockDomain::Media,
            ClockSample::HostMonotonic(_) => ClockDomain::HostMonotonic,
            ClockSample::WallClock(_) => ClockDomain::WallClock,
        }
    }
}
