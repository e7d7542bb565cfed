// A single swerve module: calibration offset, angle optimization, and
// conversion between vehicle-frame wheel states and hardware commands.

use tracing::debug;

use super::geometry::{WheelPosition, WheelState, wrap_angle};
use crate::hardware::{HardwareError, WheelHardware};

/// One swerve module wrapping its drive/steer hardware.
///
/// Purely reactive: every call is a fresh computation from the current
/// encoder readings, with no retries.
pub struct WheelModule<H> {
    name: String,
    hardware: H,
    /// Hardware steer angle at which the wheel points forward
    calibration_offset: f64,
    max_speed: f64,
    desired: WheelState,
}

impl<H: WheelHardware> WheelModule<H> {
    pub fn new(
        name: impl Into<String>,
        hardware: H,
        calibration_offset: f64,
        max_speed: f64,
    ) -> Self {
        Self {
            name: name.into(),
            hardware,
            calibration_offset,
            max_speed,
            desired: WheelState::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command the module to `state` (vehicle frame).
    ///
    /// The target is moved into the hardware frame, then optimized so the
    /// wheel never steers more than 90 degrees; a reversal flips the drive
    /// direction instead of spinning the wheel around.
    pub fn set_desired_state(&mut self, state: WheelState) -> Result<(), HardwareError> {
        let current = self.hardware.steer_position()?;
        let corrected = WheelState::new(state.speed, state.angle + self.calibration_offset);
        let optimized = corrected.optimize(current);

        debug!(
            "{}: desired {:.3} m/s @ {:.3} rad -> {:.3} m/s @ {:.3} rad (hw)",
            self.name, state.speed, state.angle, optimized.speed, optimized.angle
        );

        self.hardware
            .set_drive_output(optimized.speed / self.max_speed)?;
        self.hardware.set_steer_position(optimized.angle, true)?;
        self.desired = state;
        Ok(())
    }

    /// Measured speed and vehicle-frame angle
    pub fn state(&mut self) -> Result<WheelState, HardwareError> {
        Ok(WheelState::new(
            self.hardware.drive_velocity()?,
            self.vehicle_angle()?,
        ))
    }

    /// Cumulative distance and vehicle-frame angle
    pub fn position(&mut self) -> Result<WheelPosition, HardwareError> {
        Ok(WheelPosition::new(
            self.hardware.drive_position()?,
            self.vehicle_angle()?,
        ))
    }

    /// Raw steer angle in the hardware frame. With the wheel physically
    /// pointed forward, this is the value to use as its calibration offset.
    pub fn raw_steer_angle(&mut self) -> Result<f64, HardwareError> {
        self.hardware.steer_position()
    }

    /// Last state passed to `set_desired_state`, before optimization
    pub fn desired_state(&self) -> WheelState {
        self.desired
    }

    /// Zero the distance counter. Only meaningful while the wheel is stationary.
    pub fn reset_distance(&mut self) -> Result<(), HardwareError> {
        self.hardware.reset_drive_position()
    }

    pub fn stop(&mut self) -> Result<(), HardwareError> {
        self.desired.speed = 0.0;
        self.hardware.stop()
    }

    fn vehicle_angle(&mut self) -> Result<f64, HardwareError> {
        Ok(wrap_angle(
            self.hardware.steer_position()? - self.calibration_offset,
        ))
    }
}
