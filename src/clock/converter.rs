//! Clock conversion
//!
//! Maps timestamps from the capture device clock, the host monotonic clock
//! and wall-clock dates onto the canonical timebase (host monotonic
//! nanoseconds).

use super::time::{CanonicalTime, ClockSample, MediaTime};
use crate::utils::error::{RecorderError, RecorderResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Host monotonic clock; defines the canonical timebase
pub trait HostClock: Send + Sync {
    fn now(&self) -> MediaTime;
}

/// Calendar clock used by auxiliary sensors
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reference clock of a capture device
pub trait MediaClock: Send + Sync {
    fn now(&self) -> MediaTime;
}

/// The OS monotonic clock, read on its absolute epoch
///
/// Linux and Android use `CLOCK_BOOTTIME`, the clock sensor events are
/// stamped with; other Unix systems use `CLOCK_MONOTONIC`. Host timestamps
/// from capture drivers can therefore be passed through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostClock;

impl HostClock for SystemHostClock {
    fn now(&self) -> MediaTime {
        MediaTime::from_nanos(monotonic_nanos())
    }
}

/// For capture devices that stamp buffers with the host clock
impl MediaClock for SystemHostClock {
    fn now(&self) -> MediaTime {
        MediaTime::from_nanos(monotonic_nanos())
    }
}

#[cfg(unix)]
fn monotonic_nanos() -> i64 {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    const CLOCK: libc::clockid_t = libc::CLOCK_BOOTTIME;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;

    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // clock_gettime only writes into `ts`
    let ret = unsafe { libc::clock_gettime(CLOCK, &mut ts) };
    if ret != 0 {
        tracing::error!("clock_gettime failed: {}", std::io::Error::last_os_error());
        return process_nanos();
    }
    (ts.tv_sec as i64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as i64)
}

#[cfg(not(unix))]
fn monotonic_nanos() -> i64 {
    process_nanos()
}

/// Nanoseconds since the first host clock read in this process
fn process_nanos() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    i64::try_from(epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Every clock read at (nearly) the same instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSnapshot {
    pub host: CanonicalTime,
    pub wall: DateTime<Utc>,
    pub media: Option<MediaTime>,
}

impl ClockSnapshot {
    /// Offset that maps wall-clock nanoseconds onto the host clock
    pub fn wall_to_host_offset_ns(&self) -> Option<i64> {
        let wall_ns = self.wall.timestamp_nanos_opt()?;
        self.host.as_nanos().checked_sub(wall_ns)
    }
}

struct MediaBinding {
    clock: Arc<dyn MediaClock>,
    offset_ns: i64,
}

/// Converts timestamps from every supported clock domain into canonical time
///
/// The media-to-host offset is measured once per [`bind_media_clock`] call
/// and cached. The wall-to-host offset is resampled on every conversion so
/// calendar drift never accumulates.
///
/// [`bind_media_clock`]: ClockConverter::bind_media_clock
pub struct ClockConverter {
    host: Arc<dyn HostClock>,
    wall: Arc<dyn WallClock>,
    media: RwLock<Option<MediaBinding>>,
}

impl ClockConverter {
    /// Create a converter on the system host and wall clocks
    pub fn new() -> Self {
        Self::with_clocks(Arc::new(SystemHostClock), Arc::new(SystemWallClock))
    }

    pub fn with_clocks(host: Arc<dyn HostClock>, wall: Arc<dyn WallClock>) -> Self {
        Self {
            host,
            wall,
            media: RwLock::new(None),
        }
    }

    /// Bind the capture device clock and measure its offset to the host clock
    ///
    /// The media clock is read between two host reads and the offset is taken
    /// against their midpoint. Calling this again re-synchronizes.
    pub fn bind_media_clock(&self, clock: Arc<dyn MediaClock>) -> RecorderResult<()> {
        let before = self.host.now().nanoseconds()?;
        let media = clock.now().nanoseconds()?;
        let after = self.host.now().nanoseconds()?;

        let host_mid = before + (after - before) / 2;
        let offset_ns = host_mid.checked_sub(media).ok_or_else(|| {
            RecorderError::InvalidTimestamp(format!(
                "media clock reading {} is out of range of the host clock",
                media
            ))
        })?;

        tracing::debug!(
            "Bound media clock: offset {}ns (sync window {}ns)",
            offset_ns,
            after - before
        );

        *self.media.write() = Some(MediaBinding { clock, offset_ns });
        Ok(())
    }

    /// Whether a media clock is currently bound
    pub fn is_bound(&self) -> bool {
        self.media.read().is_some()
    }

    /// Cached media-to-host offset, if bound
    pub fn media_offset_ns(&self) -> Option<i64> {
        self.media.read().as_ref().map(|binding| binding.offset_ns)
    }

    /// Convert a raw timestamp into canonical time
    pub fn to_canonical(&self, sample: ClockSample) -> RecorderResult<CanonicalTime> {
        let offset_ns = self
            .media_offset_ns()
            .ok_or_else(|| RecorderError::NotReady("media clock is not bound".to_string()))?;

        let nanos = match sample {
            ClockSample::Media(time) => {
                time.nanoseconds()?.checked_add(offset_ns).ok_or_else(|| {
                    RecorderError::InvalidTimestamp(format!("media time {} overflows", time))
                })?
            }
            ClockSample::HostMonotonic(time) => time.nanoseconds()?,
            ClockSample::WallClock(date) => {
                let host_now = self.host.now().nanoseconds()?;
                let wall_now = self.wall.now();
                let delta = (date - wall_now).num_nanoseconds().ok_or_else(|| {
                    RecorderError::InvalidTimestamp(format!(
                        "wall-clock time {} is too far from now",
                        date
                    ))
                })?;
                host_now.checked_add(delta).ok_or_else(|| {
                    RecorderError::InvalidTimestamp(format!("wall-clock time {} overflows", date))
                })?
            }
        };

        Ok(CanonicalTime::from_nanos(nanos))
    }

    /// Express a canonical time on the bound media clock
    pub fn to_media_time(&self, time: CanonicalTime, timescale: i32) -> RecorderResult<MediaTime> {
        let offset_ns = self
            .media_offset_ns()
            .ok_or_else(|| RecorderError::NotReady("media clock is not bound".to_string()))?;
        let nanos = time.as_nanos().checked_sub(offset_ns).ok_or_else(|| {
            RecorderError::InvalidTimestamp(format!("canonical time {} overflows", time))
        })?;
        MediaTime::from_nanos(nanos).convert_scale(timescale)
    }

    /// Current canonical time
    pub fn now(&self) -> RecorderResult<CanonicalTime> {
        Ok(CanonicalTime::from_nanos(self.host.now().nanoseconds()?))
    }

    /// Read every clock, for time-base bookkeeping
    pub fn snapshot(&self) -> RecorderResult<ClockSnapshot> {
        let media = self.media.read().as_ref().map(|binding| binding.clock.now());
        Ok(ClockSnapshot {
            host: self.now()?,
            wall: self.wall.now(),
            media,
        })
    }
}

impl Default for ClockConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Manually advanced nanosecond clock
    #[derive(Default)]
    pub(crate) struct ManualClock(AtomicI64);

    impl ManualClock {
        pub(crate) fn at(nanos: i64) -> Arc<Self> {
            Arc::new(Self(AtomicI64::new(nanos)))
        }

        pub(crate) fn set(&self, nanos: i64) {
            self.0.store(nanos, Ordering::SeqCst);
        }
    }

    impl HostClock for ManualClock {
        fn now(&self) -> MediaTime {
            MediaTime::from_nanos(self.0.load(Ordering::SeqCst))
        }
    }

    impl MediaClock for ManualClock {
        fn now(&self) -> MediaTime {
            MediaTime::from_nanos(self.0.load(Ordering::SeqCst))
        }
    }

    pub(crate) struct ManualWallClock(Mutex<DateTime<Utc>>);

    impl ManualWallClock {
        pub(crate) fn at(date: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(date)))
        }

        fn set(&self, date: DateTime<Utc>) {
            *self.0.lock() = date;
        }
    }

    impl WallClock for ManualWallClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_conversion_before_bind_is_not_ready() {
        let converter = ClockConverter::with_clocks(ManualClock::at(0), ManualWallClock::at(epoch()));
        let err = converter
            .to_canonical(ClockSample::Media(MediaTime::from_nanos(5)))
            .unwrap_err();
        assert!(matches!(err, RecorderError::NotReady(_)));
        assert!(!converter.is_bound());
    }

    #[test]
    fn test_media_offset_is_cached_until_rebind() {
        let host = ManualClock::at(10_000);
        let media = ManualClock::at(4_000);
        let converter = ClockConverter::with_clocks(host.clone(), ManualWallClock::at(epoch()));
        converter.bind_media_clock(media.clone()).unwrap();
        assert_eq!(converter.media_offset_ns(), Some(6_000));

        // Clocks moving apart after binding does not change the cached offset
        host.set(50_000);
        media.set(1_000);
        let t = converter
            .to_canonical(ClockSample::Media(MediaTime::new(1, 1_000)))
            .unwrap();
        assert_eq!(t.as_nanos(), 1_000_000 + 6_000);

        converter.bind_media_clock(media).unwrap();
        assert_eq!(converter.media_offset_ns(), Some(49_000));
    }

    #[test]
    fn test_host_samples_pass_through() {
        let converter = ClockConverter::with_clocks(ManualClock::at(0), ManualWallClock::at(epoch()));
        converter.bind_media_clock(ManualClock::at(0)).unwrap();
        let t = converter
            .to_canonical(ClockSample::HostMonotonic(MediaTime::new(3, 2)))
            .unwrap();
        assert_eq!(t.as_nanos(), 1_500_000_000);
    }

    #[test]
    fn test_wall_offset_is_resampled_per_call() {
        let host = ManualClock::at(1_000_000);
        let wall = ManualWallClock::at(epoch());
        let converter = ClockConverter::with_clocks(host.clone(), wall.clone());
        converter.bind_media_clock(ManualClock::at(0)).unwrap();

        let fix = epoch() - chrono::Duration::microseconds(250);
        let t = converter.to_canonical(ClockSample::WallClock(fix)).unwrap();
        assert_eq!(t.as_nanos(), 750_000);

        // Wall clock stepped forward (NTP correction) without the host moving
        wall.set(epoch() + chrono::Duration::microseconds(100));
        let t = converter.to_canonical(ClockSample::WallClock(fix)).unwrap();
        assert_eq!(t.as_nanos(), 650_000);
    }

    #[test]
    fn test_invalid_media_time_is_rejected() {
        let converter = ClockConverter::with_clocks(ManualClock::at(0), ManualWallClock::at(epoch()));
        converter.bind_media_clock(ManualClock::at(0)).unwrap();
        let err = converter
            .to_canonical(ClockSample::Media(MediaTime::new(1, 0)))
            .unwrap_err();
        assert!(matches!(err, RecorderError::InvalidTimestamp(_)));
    }

    #[test]
    fn test_media_round_trip() {
        let converter = ClockConverter::with_clocks(ManualClock::at(2_000_000), ManualWallClock::at(epoch()));
        converter.bind_media_clock(ManualClock::at(500_000)).unwrap();

        let media = MediaTime::new(90_000, 90_000);
        let canonical = converter.to_canonical(ClockSample::Media(media)).unwrap();
        assert_eq!(canonical.as_nanos(), 1_001_500_000);
        assert_eq!(converter.to_media_time(canonical, 90_000).unwrap(), media);
    }

    #[test]
    fn test_snapshot_reads_all_clocks() {
        let converter = ClockConverter::with_clocks(ManualClock::at(42), ManualWallClock::at(epoch()));
        let snapshot = converter.snapshot().unwrap();
        assert_eq!(snapshot.host.as_nanos(), 42);
        assert_eq!(snapshot.wall, epoch());
        assert!(snapshot.media.is_none());

        converter.bind_media_clock(ManualClock::at(7)).unwrap();
        let snapshot = converter.snapshot().unwrap();
        assert_eq!(snapshot.media, Some(MediaTime::from_nanos(7)));
        assert_eq!(
            snapshot.wall_to_host_offset_ns().unwrap(),
            42 - epoch().timestamp_nanos_opt().unwrap()
        );
    }

    /// Kernel boot-time clock as the sensor stack reports it, 10ms resolution
    #[cfg(target_os = "linux")]
    fn uptime_nanos() -> i64 {
        let text = std::fs::read_to_string("/proc/uptime").unwrap();
        let secs: f64 = text.split_whitespace().next().unwrap().parse().unwrap();
        (secs * 1e9) as i64
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sensor_and_wall_stamps_share_the_timebase() {
        let converter = ClockConverter::new();
        converter.bind_media_clock(Arc::new(SystemHostClock)).unwrap();

        let gyro = MediaTime::from_nanos(uptime_nanos());
        let fix = Utc::now();
        let gyro = converter.to_canonical(ClockSample::HostMonotonic(gyro)).unwrap();
        let fix = converter.to_canonical(ClockSample::WallClock(fix)).unwrap();

        let skew_ns = (gyro.as_nanos() - fix.as_nanos()).abs();
        assert!(skew_ns < 100_000_000, "skew {}ns", skew_ns);
    }

    #[test]
    fn test_converters_share_the_host_epoch() {
        let first = ClockConverter::new();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let second = ClockConverter::new();

        let a = first.now().unwrap();
        let b = second.now().unwrap();
        assert!(b >= a);
        assert!(b.nanos_since(a) < 10_000_000, "converters disagree by {}ns", b.nanos_since(a));
    }

    #[test]
    fn test_system_clocks_are_monotonic() {
        let converter = ClockConverter::new();
        let a = converter.now().unwrap();
        let b = converter.now().unwrap();
        assert!(b >= a);
    }
}
