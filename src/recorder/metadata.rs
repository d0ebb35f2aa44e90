//! Per-frame camera metadata and clock time-base records
//!
//! Frame metadata is written as one row per written video frame, in frame
//! order. Frames without intrinsics keep their row with empty matrix cells.

use crate::clock::{CanonicalTime, ClockSnapshot};
use crate::utils::error::RecorderResult;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const FRAME_METADATA_HEADER: &str = "timestamp_ns,k00,k01,k02,k10,k11,k12,k20,k21,k22,exposure_ns,\
    frame_number,frame_duration_ns,rolling_shutter_skew_ns,iso,focal_length_mm,\
    focus_distance_diopters,af_mode";

/// 3x3 camera intrinsic matrix, row-major
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics(pub [f64; 9]);

impl CameraIntrinsics {
    /// Pinhole matrix from focal lengths and principal point (pixels)
    pub fn from_pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self([fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0])
    }

    pub fn matrix(&self) -> &[f64; 9] {
        &self.0
    }

    pub fn fx(&self) -> f64 {
        self.0[0]
    }

    pub fn fy(&self) -> f64 {
        self.0[4]
    }

    pub fn cx(&self) -> f64 {
        self.0[2]
    }

    pub fn cy(&self) -> f64 {
        self.0[5]
    }
}

/// Camera parameters reported with a captured frame
///
/// Only exposure is required; drivers fill in what their capture result
/// carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraParams {
    /// `None` while the camera has no calibration for this frame
    pub intrinsics: Option<CameraIntrinsics>,
    pub exposure_ns: i64,
    /// Driver frame counter
    pub frame_number: Option<i64>,
    pub frame_duration_ns: Option<i64>,
    /// Rolling shutter readout time
    pub rolling_shutter_skew_ns: Option<i64>,
    pub iso: Option<i32>,
    pub focal_length_mm: Option<f64>,
    pub focus_distance_diopters: Option<f64>,
    /// Driver autofocus mode code
    pub af_mode: Option<i32>,
}

impl CameraParams {
    pub fn new(intrinsics: Option<CameraIntrinsics>, exposure_ns: i64) -> Self {
        Self {
            intrinsics,
            exposure_ns,
            ..Default::default()
        }
    }
}

/// Side data of one recorded video frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    pub time: CanonicalTime,
    #[serde(flatten)]
    pub params: CameraParams,
}

impl FrameMetadata {
    pub fn new(time: CanonicalTime, params: CameraParams) -> Self {
        Self { time, params }
    }
}

fn push_cell<T: std::fmt::Display>(line: &mut String, value: Option<T>) {
    line.push(',');
    if let Some(value) = value {
        let _ = write!(line, "{}", value);
    }
}

/// Streams frame metadata rows to a file
pub struct FrameMetadataWriter {
    writer: BufWriter<File>,
    line: String,
    rows: u64,
    bytes: u64,
}

impl FrameMetadataWriter {
    /// Create the file and write the header
    pub fn create(path: &Path) -> RecorderResult<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(FRAME_METADATA_HEADER.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(Self {
            writer,
            line: String::with_capacity(160),
            rows: 0,
            bytes: FRAME_METADATA_HEADER.len() as u64 + 1,
        })
    }

    pub fn write(&mut self, frame: &FrameMetadata) -> RecorderResult<()> {
        self.line.clear();
        let p = &frame.params;
        let _ = write!(self.line, "{}", frame.time);
        match &p.intrinsics {
            Some(intrinsics) => {
                for value in intrinsics.matrix() {
                    let _ = write!(self.line, ",{}", value);
                }
            }
            None => self.line.push_str(",,,,,,,,,"),
        }
        let _ = write!(self.line, ",{}", p.exposure_ns);
        push_cell(&mut self.line, p.frame_number);
        push_cell(&mut self.line, p.frame_duration_ns);
        push_cell(&mut self.line, p.rolling_shutter_skew_ns);
        push_cell(&mut self.line, p.iso);
        push_cell(&mut self.line, p.focal_length_mm);
        push_cell(&mut self.line, p.focus_distance_diopters);
        push_cell(&mut self.line, p.af_mode);
        self.line.push('\n');

        self.writer.write_all(self.line.as_bytes())?;
        self.rows += 1;
        self.bytes += self.line.len() as u64;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush and close, returning the bytes written
    pub fn finish(mut self) -> RecorderResult<u64> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.bytes)
    }
}

/// Write clock snapshots taken at session start and end
///
/// Offline tools use the two rows to check how far the wall clock drifted
/// against the host clock during the session.
pub fn write_timebase(path: &Path, start: &ClockSnapshot, end: &ClockSnapshot) -> RecorderResult<()> {
    let mut text = String::new();
    text.push_str("# host_ns: host monotonic clock (canonical timebase)\n");
    text.push_str("# wall_unix_ns: wall clock; media_ns: capture device clock, empty if unbound\n");
    text.push_str("event,host_ns,wall_unix_ns,media_ns,wall_to_host_offset_ns\n");
    for (event, snapshot) in [("start", start), ("end", end)] {
        let media = snapshot
            .media
            .and_then(|t| t.nanoseconds().ok())
            .map(|ns| ns.to_string())
            .unwrap_or_default();
        let offset = snapshot
            .wall_to_host_offset_ns()
            .map(|ns| ns.to_string())
            .unwrap_or_default();
        let _ = writeln!(
            text,
            "{},{},{},{},{}",
            event,
            snapshot.host,
            snapshot.wall.timestamp_nanos_opt().unwrap_or_default(),
            media,
            offset
        );
    }
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MediaTime;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    #[test]
    fn test_rows_follow_write_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frames.csv");
        let mut writer = FrameMetadataWriter::create(&path).unwrap();

        let k = CameraIntrinsics::from_pinhole(500.0, 510.0, 320.0, 240.0);
        writer
            .write(&FrameMetadata::new(CanonicalTime::from_nanos(20), CameraParams::new(Some(k), 1_000)))
            .unwrap();
        writer
            .write(&FrameMetadata::new(CanonicalTime::from_nanos(10), CameraParams::new(None, 2_000)))
            .unwrap();
        assert_eq!(writer.rows(), 2);
        let bytes = writer.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(bytes as usize, text.len());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], FRAME_METADATA_HEADER);
        assert_eq!(lines[1], "20,500,0,320,0,510,240,0,0,1,1000,,,,,,,");
        assert_eq!(lines[2], "10,,,,,,,,,,2000,,,,,,,");
        assert_eq!(lines[2].split(',').count(), 18);
    }

    #[test]
    fn test_capture_result_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frames.csv");
        let mut writer = FrameMetadataWriter::create(&path).unwrap();

        let params = CameraParams {
            frame_number: Some(42),
            frame_duration_ns: Some(33_333_333),
            rolling_shutter_skew_ns: Some(16_000_000),
            iso: Some(400),
            focal_length_mm: Some(4.38),
            focus_distance_diopters: Some(0.5),
            af_mode: Some(4),
            ..CameraParams::new(None, 5_000_000)
        };
        writer
            .write(&FrameMetadata::new(CanonicalTime::from_nanos(7), params))
            .unwrap();
        writer.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let header: Vec<&str> = FRAME_METADATA_HEADER.split(',').collect();
        let row: Vec<&str> = text.lines().nth(1).unwrap().split(',').collect();
        assert_eq!(header.len(), row.len());

        let cell = |name: &str| row[header.iter().position(|h| *h == name).unwrap()];
        assert_eq!(cell("timestamp_ns"), "7");
        assert_eq!(cell("k00"), "");
        assert_eq!(cell("exposure_ns"), "5000000");
        assert_eq!(cell("frame_number"), "42");
        assert_eq!(cell("frame_duration_ns"), "33333333");
        assert_eq!(cell("rolling_shutter_skew_ns"), "16000000");
        assert_eq!(cell("iso"), "400");
        assert_eq!(cell("focal_length_mm"), "4.38");
        assert_eq!(cell("focus_distance_diopters"), "0.5");
        assert_eq!(cell("af_mode"), "4");
    }

    #[test]
    fn test_params_from_json_default_missing_fields() {
        let params: CameraParams =
            serde_json::from_str(r#"{ "exposureNs": 1000, "iso": 100 }"#).unwrap();
        assert_eq!(params.iso, Some(100));
        assert_eq!(params.intrinsics, None);
        assert_eq!(params.frame_number, None);
    }

    #[test]
    fn test_pinhole_accessors() {
        let k = CameraIntrinsics::from_pinhole(1.0, 2.0, 3.0, 4.0);
        assert_eq!((k.fx(), k.fy(), k.cx(), k.cy()), (1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_timebase_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("timebase.csv");
        let wall = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let start = ClockSnapshot {
            host: CanonicalTime::from_nanos(1_000),
            wall,
            media: Some(MediaTime::new(1, 1_000)),
        };
        let end = ClockSnapshot {
            host: CanonicalTime::from_nanos(2_000),
            wall,
            media: None,
        };
        write_timebase(&path, &start, &end).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[1].starts_with("start,1000,1700000000000000000,1000000,"));
        assert!(rows[2].starts_with("end,2000,1700000000000000000,,"));
    }
}
