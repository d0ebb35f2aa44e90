//! Append-only sensor log
//!
//! Producers push samples from their own threads; ordering is only
//! established once, when the log is written out.

use super::sample::SensorSample;
use crate::utils::error::RecorderResult;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Header of the sensor log table
pub const INERTIAL_HEADER: &str = "timestamp_ns,sensor,x,y,z";

/// Thread-safe accumulator of [`SensorSample`]s
#[derive(Debug, Default)]
pub struct InertialSampleLog {
    samples: Mutex<Vec<SensorSample>>,
}

impl InertialSampleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Record a sample. Never performs I/O.
    pub fn append(&self, sample: SensorSample) {
        self.samples.lock().push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Drop everything recorded so far
    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    /// Take all samples out of the log, sorted by canonical time
    ///
    /// The sort is stable: samples sharing a timestamp keep append order.
    pub fn drain_sorted(&self) -> Vec<SensorSample> {
        let mut samples = std::mem::take(&mut *self.samples.lock());
        samples.sort_by_key(|sample| sample.time());
        samples
    }

    /// Sort and write every sample to `path`, returning the bytes written
    pub fn finalize_and_write(&self, path: &Path) -> RecorderResult<u64> {
        let samples = self.drain_sorted();
        let written = write_samples(&samples, path)?;
        tracing::debug!(
            "Wrote {} sensor samples ({} bytes) to {:?}",
            samples.len(),
            written,
            path
        );
        Ok(written)
    }
}

/// Write samples as a delimited table in the given order
pub fn write_samples(samples: &[SensorSample], path: &Path) -> RecorderResult<u64> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut line = String::with_capacity(96);
    let mut written = 0u64;

    line.push_str(INERTIAL_HEADER);
    line.push('\n');
    writer.write_all(line.as_bytes())?;
    written += line.len() as u64;

    for sample in samples {
        line.clear();
        // Writing into a String cannot fail
        let _ = writeln!(
            line,
            "{},{},{},{},{}",
            sample.time(),
            sample.kind().tag(),
            sample.x(),
            sample.y(),
            sample.z()
        );
        writer.write_all(line.as_bytes())?;
        written += line.len() as u64;
    }

    writer.flush()?;
    Ok(written)
}
