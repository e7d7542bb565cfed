// Feetech servo backend for the swerve modules
//
// Provides:
// - Feetech STS3215 serial protocol implementation
// - WheelHardware over a drive servo (velocity mode) and a steer servo (step mode)

pub mod feetech;
mod wheel;

pub use feetech::{FeetechBus, FeetechError};
pub use wheel::{FeetechWheel, MAX_SERVO_STEPS_PER_SEC, SharedBus, open_wheels};
