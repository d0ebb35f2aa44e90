//! Gyroscope/accelerometer pairing
//!
//! Builds one combined IMU row per gyroscope sample by sampling the
//! accelerometer stream at the gyroscope timestamp.

use super::sample::{SensorKind, SensorSample};
use crate::clock::CanonicalTime;
use crate::utils::error::RecorderResult;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Accelerometer readings this close to a gyro timestamp are used as-is
pub const INTERPOLATION_TOLERANCE_NS: i64 = 500;

pub const IMU_HEADER: &str = "timestamp_ns,gx,gy,gz,ax,ay,az";

/// Gyroscope sample paired with the accelerometer value at the same instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImuRow {
    pub time: CanonicalTime,
    pub gyro: [f64; 3],
    pub accel: [f64; 3],
}

/// Pair every gyroscope sample with an accelerometer value
///
/// `samples` must be sorted by time. Gyro samples outside the span covered by
/// the accelerometer are dropped.
pub fn synchronize_imu(samples: &[SensorSample]) -> Vec<ImuRow> {
    let accels: Vec<&SensorSample> = samples
        .iter()
        .filter(|s| s.kind() == SensorKind::Accelerometer)
        .collect();

    let mut rows = Vec::new();
    let mut dropped = 0usize;

    for gyro in samples.iter().filter(|s| s.kind() == SensorKind::Gyroscope) {
        let t = gyro.time();
        let split = accels.partition_point(|a| a.time() <= t);
        let left = split.checked_sub(1).map(|i| accels[i]);
        let right = accels.get(split).copied();

        let accel = match (left, right) {
            (Some(l), _) if t.nanos_since(l.time()) <= INTERPOLATION_TOLERANCE_NS => l.vector(),
            (_, Some(r)) if r.time().nanos_since(t) <= INTERPOLATION_TOLERANCE_NS => r.vector(),
            (Some(l), Some(r)) => interpolate(l, r, t),
            _ => {
                dropped += 1;
                continue;
            }
        };

        rows.push(ImuRow {
            time: t,
            gyro: gyro.vector(),
            accel,
        });
    }

    if dropped > 0 {
        tracing::debug!("Dropped {} gyro samples without accelerometer coverage", dropped);
    }

    rows
}

fn interpolate(left: &SensorSample, right: &SensorSample, t: CanonicalTime) -> [f64; 3] {
    let span = right.time().nanos_since(left.time()) as f64;
    let ratio = t.nanos_since(left.time()) as f64 / span;
    let (l, r) = (left.vector(), right.vector());
    [
        l[0] + (r[0] - l[0]) * ratio,
        l[1] + (r[1] - l[1]) * ratio,
        l[2] + (r[2] - l[2]) * ratio,
    ]
}

/// Write IMU rows as a delimited table, returning the bytes written
pub fn write_imu_rows(rows: &[ImuRow], path: &Path) -> RecorderResult<u64> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut line = String::with_capacity(128);
    let _ = writeln!(line, "{}", IMU_HEADER);
    for row in rows {
        let _ = writeln!(
            line,
            "{},{},{},{},{},{},{}",
            row.time, row.gyro[0], row.gyro[1], row.gyro[2], row.accel[0], row.accel[1], row.accel[2]
        );
    }
    writer.write_all(line.as_bytes())?;
    writer.flush()?;
    Ok(line.len() as u64)
}
