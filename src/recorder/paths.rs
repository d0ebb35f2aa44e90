//! Sibling artifact paths for a session destination

use std::path::{Path, PathBuf};

/// Final locations of every artifact of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub media: PathBuf,
    pub frames: PathBuf,
    pub inertial: PathBuf,
    pub imu: PathBuf,
    pub timebase: PathBuf,
}

impl SessionPaths {
    /// `dir/run.mp4` gives `dir/run.frames.csv`, `dir/run.inertial.csv`, ...
    pub fn for_destination(destination: &Path) -> Self {
        let side = |tag: &str| with_suffix(destination, tag, "csv");
        Self {
            media: destination.to_path_buf(),
            frames: side("frames"),
            inertial: side("inertial"),
            imu: side("imu"),
            timebase: side("timebase"),
        }
    }

    /// Where an artifact lives until the session completes
    pub fn partial(path: &Path) -> PathBuf {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        if ext.is_empty() {
            let mut name = path.as_os_str().to_owned();
            name.push(".partial");
            PathBuf::from(name)
        } else {
            with_suffix(path, "partial", &ext)
        }
    }
}

fn with_suffix(path: &Path, tag: &str, ext: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    path.with_file_name(format!("{}.{}.{}", stem, tag, ext))
}
