// Swerve drive core
//
// Provides:
// - Swerve kinematics (chassis velocity <-> four wheel states) with desaturation
// - Per-module angle optimization and calibration offsets
// - Slew-rate input shaping
// - Heading + wheel odometry
// - The drive controller tying them together once per control cycle

use std::time::Instant;

use crate::config::ConfigError;
use crate::hardware::HardwareError;

pub mod calibration;
mod controller;
pub mod geometry;
pub mod heading;
pub mod kinematics;
pub mod module;
pub mod odometry;
pub mod shaper;

pub use calibration::{CalibrationState, HeadingCalibration};
pub use controller::DriveController;
pub use geometry::{ChassisVelocity, Pose, WheelPosition, WheelState};
pub use kinematics::{SwerveKinematics, desaturate};
pub use odometry::{Odometry, SensorSnapshot};

/// Error types for the drive core
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Invalid drive configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
}

/// Something the scheduler advances once per control cycle
pub trait Periodic {
    fn tick(&mut self, now: Instant) -> Result<(), DriveError>;
}
