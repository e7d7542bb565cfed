// Simulated swerve hardware
//
// Wheels follow their setpoints instantly: the steer angle jumps to the
// commanded position and the drive runs at exactly the commanded speed.
// Handles are cheap clones sharing state, so a test (or the runtime's
// simulation mode) can keep one while the drive owns another.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::DriveConfig;
use crate::drive::geometry::{MODULE_COUNT, WheelState, wrap_angle};
use crate::drive::kinematics::SwerveKinematics;
use crate::drive::DriveError;
use crate::hardware::{Gyro, HardwareError, WheelHardware};

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct WheelInner {
    max_speed: f64,
    drive_output: f64,
    distance: f64,
    /// Unwrapped steer angle, radians
    steer_angle: f64,
    steer_setpoint: f64,
    steer_continuous: bool,
    /// Total steering rotation ever performed, radians
    steer_travel: f64,
    fail_next: Option<String>,
}

/// Simulated drive + steer pair
#[derive(Debug, Clone, Default)]
pub struct SimWheel {
    inner: Arc<Mutex<WheelInner>>,
}

impl SimWheel {
    pub fn new(max_speed: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WheelInner {
                max_speed,
                ..Default::default()
            })),
        }
    }

    /// Let `dt` seconds pass at the current drive output
    pub fn advance(&self, dt: f64) {
        let mut wheel = lock(&self.inner);
        wheel.distance += wheel.drive_output * wheel.max_speed * dt;
    }

    pub fn drive_output(&self) -> f64 {
        lock(&self.inner).drive_output
    }

    pub fn steer_setpoint(&self) -> f64 {
        lock(&self.inner).steer_setpoint
    }

    pub fn steer_continuous(&self) -> bool {
        lock(&self.inner).steer_continuous
    }

    pub fn steer_angle(&self) -> f64 {
        lock(&self.inner).steer_angle
    }

    pub fn steer_travel(&self) -> f64 {
        lock(&self.inner).steer_travel
    }

    /// Velocity and (hardware-frame) angle the wheel is actually running at
    pub fn actual_state(&self) -> WheelState {
        let wheel = lock(&self.inner);
        WheelState::new(wheel.drive_output * wheel.max_speed, wheel.steer_angle)
    }

    pub fn set_distance(&self, distance: f64) {
        lock(&self.inner).distance = distance;
    }

    /// Make the next hardware call fail as if `what` dropped off the bus
    pub fn fail_next(&self, what: &str) {
        lock(&self.inner).fail_next = Some(what.to_string());
    }

    fn check(&self) -> Result<MutexGuard<'_, WheelInner>, HardwareError> {
        let mut wheel = lock(&self.inner);
        match wheel.fail_next.take() {
            Some(what) => Err(HardwareError::Disconnected { what }),
            None => Ok(wheel),
        }
    }
}

impl WheelHardware for SimWheel {
    fn set_drive_output(&mut self, normalized: f64) -> Result<(), HardwareError> {
        self.check()?.drive_output = normalized.clamp(-1.0, 1.0);
        Ok(())
    }

    fn set_steer_position(&mut self, radians: f64, continuous: bool) -> Result<(), HardwareError> {
        let mut wheel = self.check()?;
        let target = if continuous {
            wheel.steer_angle + wrap_angle(radians - wheel.steer_angle)
        } else {
            radians
        };
        wheel.steer_travel += (target - wheel.steer_angle).abs();
        wheel.steer_angle = target;
        wheel.steer_setpoint = radians;
        wheel.steer_continuous = continuous;
        Ok(())
    }

    fn drive_velocity(&mut self) -> Result<f64, HardwareError> {
        let wheel = self.check()?;
        Ok(wheel.drive_output * wheel.max_speed)
    }

    fn drive_position(&mut self) -> Result<f64, HardwareError> {
        Ok(self.check()?.distance)
    }

    fn steer_position(&mut self) -> Result<f64, HardwareError> {
        Ok(self.check()?.steer_angle)
    }

    fn reset_drive_position(&mut self) -> Result<(), HardwareError> {
        self.check()?.distance = 0.0;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.check()?.drive_output = 0.0;
        Ok(())
    }
}

#[derive(Debug)]
struct GyroInner {
    /// True yaw in the sensor convention (clockwise positive)
    yaw: f64,
    rate: f64,
    reference: f64,
    connected: bool,
}

/// Simulated yaw sensor, clockwise positive like the real one
#[derive(Debug, Clone)]
pub struct SimGyro {
    inner: Arc<Mutex<GyroInner>>,
}

impl Default for SimGyro {
    fn default() -> Self {
        Self::new()
    }
}

impl SimGyro {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(GyroInner {
                yaw: 0.0,
                rate: 0.0,
                reference: 0.0,
                connected: true,
            })),
        }
    }

    /// Put the vehicle at `heading` (counter-clockwise positive, world frame)
    pub fn set_heading(&self, heading: f64) {
        lock(&self.inner).yaw = -heading;
    }

    /// Set the yaw rate (counter-clockwise positive)
    pub fn set_rate(&self, rate: f64) {
        lock(&self.inner).rate = -rate;
    }

    /// Turn the vehicle counter-clockwise by `angle`
    pub fn rotate(&self, angle: f64) {
        lock(&self.inner).yaw -= angle;
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.inner).connected = connected;
    }
}

impl Gyro for SimGyro {
    fn angle(&mut self) -> f64 {
        let gyro = lock(&self.inner);
        gyro.yaw - gyro.reference
    }

    fn rate(&mut self) -> f64 {
        lock(&self.inner).rate
    }

    fn is_connected(&mut self) -> bool {
        lock(&self.inner).connected
    }

    fn reset(&mut self) {
        let mut gyro = lock(&self.inner);
        gyro.reference = gyro.yaw;
    }
}

/// Four simulated wheels and a gyro moving together as one rigid base.
/// The gyro turns at the yaw rate implied by the wheels.
pub struct SimulatedBase {
    pub wheels: [SimWheel; MODULE_COUNT],
    pub gyro: SimGyro,
    kinematics: SwerveKinematics,
    calibration_offsets: [f64; MODULE_COUNT],
}

impl SimulatedBase {
    pub fn new(config: &DriveConfig) -> Result<Self, DriveError> {
        Ok(Self {
            wheels: [0; MODULE_COUNT].map(|_| SimWheel::new(config.max_speed)),
            gyro: SimGyro::new(),
            kinematics: SwerveKinematics::new(config.offsets())?,
            calibration_offsets: config.modules.each_ref().map(|m| m.calibration_offset),
        })
    }

    /// Let `dt` seconds of motion pass
    pub fn step(&self, dt: f64) {
        let states: [WheelState; MODULE_COUNT] = std::array::from_fn(|i| {
            let actual = self.wheels[i].actual_state();
            WheelState::new(actual.speed, actual.angle - self.calibration_offsets[i])
        });
        let chassis = self.kinematics.to_chassis_velocity(&states);

        for wheel in &self.wheels {
            wheel.advance(dt);
        }
        self.gyro.set_rate(chassis.omega);
        self.gyro.rotate(chassis.omega * dt);
    }
}
