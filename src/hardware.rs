// Hardware capability surface used by the drive core
//
// Vendor-specific motor and sensor access lives behind these traits so the
// kinematics, odometry and shaping logic can run against simulated hardware.

use crate::motor::FeetechError;

/// Error types for hardware access
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("Motor bus error: {0}")]
    Bus(#[from] FeetechError),

    #[error("{what} is disconnected")]
    Disconnected { what: String },
}

/// One swerve module's drive and steer actuators with their encoders.
///
/// All calls are expected to complete well within one control cycle.
pub trait WheelHardware {
    /// Drive motor output, normalized to [-1, 1] of max speed
    fn set_drive_output(&mut self, normalized: f64) -> Result<(), HardwareError>;

    /// Steer position setpoint in radians (hardware frame). With `continuous`
    /// set, the setpoint is circular and the steer loop takes the short way
    /// across the 0/2*PI boundary.
    fn set_steer_position(&mut self, radians: f64, continuous: bool) -> Result<(), HardwareError>;

    /// Drive velocity in m/s
    fn drive_velocity(&mut self) -> Result<f64, HardwareError>;

    /// Cumulative drive distance in meters
    fn drive_position(&mut self) -> Result<f64, HardwareError>;

    /// Steer angle in radians (hardware frame)
    fn steer_position(&mut self) -> Result<f64, HardwareError>;

    /// Zero the cumulative drive distance
    fn reset_drive_position(&mut self) -> Result<(), HardwareError>;

    /// Zero output on both actuators
    fn stop(&mut self) -> Result<(), HardwareError>;
}

/// Single-axis orientation sensor.
///
/// Angles follow the sensor's own convention (clockwise-positive, like most
/// navigation IMUs); `HeadingSource` converts to counter-clockwise-positive.
pub trait Gyro {
    /// Accumulated yaw in radians since the last reset (continuous, not wrapped)
    fn angle(&mut self) -> f64;

    /// Yaw rate in rad/s
    fn rate(&mut self) -> f64;

    fn is_connected(&mut self) -> bool;

    /// Make the current orientation the zero reference
    fn reset(&mut self);
}

impl<T: WheelHardware + ?Sized> WheelHardware for Box<T> {
    fn set_drive_output(&mut self, normalized: f64) -> Result<(), HardwareError> {
        (**self).set_drive_output(normalized)
    }

    fn set_steer_position(&mut self, radians: f64, continuous: bool) -> Result<(), HardwareError> {
        (**self).set_steer_position(radians, continuous)
    }

    fn drive_velocity(&mut self) -> Result<f64, HardwareError> {
        (**self).drive_velocity()
    }

    fn drive_position(&mut self) -> Result<f64, HardwareError> {
        (**self).drive_position()
    }

    fn steer_position(&mut self) -> Result<f64, HardwareError> {
        (**self).steer_position()
    }

    fn reset_drive_position(&mut self) -> Result<(), HardwareError> {
        (**self).reset_drive_position()
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        (**self).stop()
    }
}

impl<T: Gyro + ?Sized> Gyro for Box<T> {
    fn angle(&mut self) -> f64 {
        (**self).angle()
    }

    fn rate(&mut self) -> f64 {
        (**self).rate()
    }

    fn is_connected(&mut self) -> bool {
        (**self).is_connected()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}
