//! Inertial and auxiliary sensor logging
//!
//! - `SensorSample` / `SensorKind`: tagged three-axis readings
//! - `InertialSampleLog`: concurrent accumulator written in time order
//! - `synchronize_imu`: gyro rows paired with interpolated accelerometer values

pub mod log;
pub mod sample;
pub mod sync;

pub use log::{write_samples, InertialSampleLog, INERTIAL_HEADER};
pub use sample::{SensorKind, SensorSample};
pub use sync::{synchronize_imu, write_imu_rows, ImuRow};
