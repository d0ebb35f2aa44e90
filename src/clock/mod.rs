//! Clock domains and conversion into the canonical timebase

pub mod converter;
pub mod time;

pub use converter::{
    ClockConverter, ClockSnapshot, HostClock, MediaClock, SystemHostClock, SystemWallClock,
    WallClock,
};
pub use time::{CanonicalTime, ClockDomain, ClockSample, MediaTime};
