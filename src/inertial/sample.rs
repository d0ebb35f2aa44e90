//! Sensor sample types

use crate::clock::{CanonicalTime, ClockDomain};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which physical sensor produced a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Angular velocity in rad/s
    Gyroscope,
    /// Acceleration including gravity in m/s^2
    Accelerometer,
    /// Magnetic field in microtesla
    Magnetometer,
    /// Gravity direction in m/s^2
    Gravity,
    /// Latitude, longitude (degrees) and altitude (m)
    Location,
}

impl SensorKind {
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Gyroscope,
        SensorKind::Accelerometer,
        SensorKind::Magnetometer,
        SensorKind::Gravity,
        SensorKind::Location,
    ];

    /// Short tag written to the sensor log
    pub fn tag(&self) -> &'static str {
        match self {
            SensorKind::Gyroscope => "gyro",
            SensorKind::Accelerometer => "accel",
            SensorKind::Magnetometer => "mag",
            SensorKind::Gravity => "grav",
            SensorKind::Location => "gps",
        }
    }

    /// Clock the raw readings of this sensor are stamped with
    pub fn native_clock(&self) -> ClockDomain {
        match self {
            SensorKind::Location => ClockDomain::WallClock,
            _ => ClockDomain::HostMonotonic,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorKind::ALL
            .into_iter()
            .find(|kind| kind.tag() == s)
            .ok_or_else(|| format!("unknown sensor tag '{}'", s))
    }
}

/// One three-axis reading on the canonical timebase
///
/// Fields are private so a sample cannot change after it is logged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    time: CanonicalTime,
    kind: SensorKind,
    x: f64,
    y: f64,
    z: f64,
}

impl SensorSample {
    pub fn new(kind: SensorKind, time: CanonicalTime, [x, y, z]: [f64; 3]) -> Self {
        Self { time, kind, x, y, z }
    }

    pub fn time(&self) -> CanonicalTime {
        self.time
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    pub fn vector(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}
