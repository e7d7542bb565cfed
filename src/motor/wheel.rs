// Feetech-backed swerve module: one servo in velocity mode drives the wheel,
// one in step mode turns it. Both share a single serial bus.

use std::f64::consts::TAU;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::feetech::{FeetechBus, FeetechError, OperatingMode, Register, STEPS_PER_REV};
use crate::config::{DriveConfig, ModuleConfig, PidGains};
use crate::drive::geometry::{MODULE_COUNT, wrap_angle, wrap_positive};
use crate::hardware::{HardwareError, WheelHardware};

/// Fastest the drive servo turns, steps/s
pub const MAX_SERVO_STEPS_PER_SEC: f64 = 3000.0;

/// Bus shared by every module on the same serial line
pub type SharedBus<P> = Arc<Mutex<FeetechBus<P>>>;

const STEPS: f64 = STEPS_PER_REV as f64;

/// Protection current register unit, amps
const CURRENT_UNIT_AMPS: f64 = 0.0065;
/// Largest protection current the servo accepts
const MAX_CURRENT_RAW: u16 = 511;

/// Servo factory gain (32) corresponds to 1.0
fn gain_raw(gain: f64) -> u8 {
    (gain * 32.0).round().clamp(0.0, 254.0) as u8
}

fn current_raw(amps: u16) -> u16 {
    ((amps as f64 / CURRENT_UNIT_AMPS) as u16).min(MAX_CURRENT_RAW)
}

/// Signed shortest step count from `from` to `to` on the encoder ring
fn step_delta(from: u16, to: u16) -> i64 {
    let delta = (to as i64 - from as i64).rem_euclid(STEPS_PER_REV as i64);
    if delta > STEPS_PER_REV as i64 / 2 {
        delta - STEPS_PER_REV as i64
    } else {
        delta
    }
}

/// Drive servo speed for full output: `max_speed` at the wheel, capped at
/// what the servo can turn
fn drive_full_scale(config: &DriveConfig) -> f64 {
    let wanted = config.max_speed / config.meters_per_drive_rev() * STEPS;
    if wanted > MAX_SERVO_STEPS_PER_SEC {
        warn!(
            "max_speed {:.2} m/s is beyond the drive servo, full output is {:.2} m/s",
            config.max_speed,
            MAX_SERVO_STEPS_PER_SEC / STEPS * config.meters_per_drive_rev()
        );
    }
    wanted.min(MAX_SERVO_STEPS_PER_SEC)
}

pub struct FeetechWheel<P: Read + Write> {
    bus: SharedBus<P>,
    drive_id: u8,
    steer_id: u8,
    /// -1.0 when the drive servo is mounted reversed
    drive_sign: f64,
    meters_per_rev: f64,
    /// Goal velocity for a normalized output of 1.0, steps/s
    drive_full_scale: f64,
    steer_gear_ratio: f64,
    /// Drive steps accumulated since the last reset, unwrapped
    drive_steps: i64,
    last_drive_raw: u16,
    /// Where step mode has been told to put the steer servo, unwrapped steps
    steer_commanded: i64,
}

impl<P: Read + Write> FeetechWheel<P> {
    /// Take over a module's two servos: check they answer, set their modes,
    /// and load the steer gains and current limits.
    pub fn new(
        bus: SharedBus<P>,
        module: &ModuleConfig,
        config: &DriveConfig,
    ) -> Result<Self, HardwareError> {
        let (drive_id, steer_id) = (module.drive_motor_id, module.steer_motor_id);
        let (last_drive_raw, steer_raw) = {
            let mut bus = lock(&bus);
            for id in [drive_id, steer_id] {
                if !bus.ping(id)? {
                    warn!("Motor {} ({}) not responding to ping", id, module.name);
                    return Err(FeetechError::Timeout { id }.into());
                }
                bus.set_torque(id, false)?;
            }

            let drive_current = current_raw(config.drive_current_limit);
            bus.set_operating_mode(drive_id, OperatingMode::Velocity)?;
            bus.write_u16(drive_id, Register::ProtectionCurrent, drive_current)?;

            let steer_current = current_raw(config.steer_current_limit);
            bus.set_operating_mode(steer_id, OperatingMode::Step)?;
            write_gains(&mut bus, steer_id, &config.steer_gains)?;
            bus.write_u16(steer_id, Register::ProtectionCurrent, steer_current)?;

            for id in [drive_id, steer_id] {
                bus.set_torque(id, true)?;
            }
            (bus.position(drive_id)?, bus.position(steer_id)?)
        };

        info!("Module {} ready on motors {}/{}", module.name, drive_id, steer_id);
        Ok(Self {
            bus,
            drive_id,
            steer_id,
            drive_sign: if module.drive_inverted { -1.0 } else { 1.0 },
            meters_per_rev: config.meters_per_drive_rev(),
            drive_full_scale: drive_full_scale(config),
            steer_gear_ratio: config.steer_gear_ratio,
            drive_steps: 0,
            last_drive_raw,
            steer_commanded: steer_raw as i64,
        })
    }

    fn steps_per_radian(&self) -> f64 {
        STEPS * self.steer_gear_ratio / TAU
    }

    /// Servo steps nearest the commanded position that match the encoder
    /// reading. The encoder only sees one servo turn, so with geared steering
    /// the commanded position picks which turn the module is on.
    fn steer_unwrapped(&self, raw: u16) -> i64 {
        let expected = self.steer_commanded.rem_euclid(STEPS_PER_REV as i64) as u16;
        self.steer_commanded + step_delta(expected, raw)
    }
}

fn lock<P>(bus: &SharedBus<P>) -> MutexGuard<'_, FeetechBus<P>> {
    bus.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write_gains<P: Read + Write>(
    bus: &mut FeetechBus<P>,
    id: u8,
    gains: &PidGains,
) -> Result<(), FeetechError> {
    bus.write_u8(id, Register::PGain, gain_raw(gains.p))?;
    bus.write_u8(id, Register::IGain, gain_raw(gains.i))?;
    bus.write_u8(id, Register::DGain, gain_raw(gains.d))
}

impl<P: Read + Write> WheelHardware for FeetechWheel<P> {
    fn set_drive_output(&mut self, normalized: f64) -> Result<(), HardwareError> {
        let output = normalized.clamp(-1.0, 1.0) * self.drive_sign;
        let steps = (output * self.drive_full_scale).round();
        lock(&self.bus).write_i16(self.drive_id, Register::GoalVelocity, steps as i16)?;
        Ok(())
    }

    fn set_steer_position(&mut self, radians: f64, continuous: bool) -> Result<(), HardwareError> {
        let current = self.steer_commanded as f64 / self.steps_per_radian();
        let delta = if continuous {
            wrap_angle(radians - current)
        } else {
            radians - current
        };

        let steps = (delta * self.steps_per_radian()).round() as i64;
        if steps == 0 {
            return Ok(());
        }
        // One GoalPosition write moves at most 15 bits of steps
        let steps = steps.clamp(-(i16::MAX as i64), i16::MAX as i64);
        debug!("Motor {} steering {} steps", self.steer_id, steps);
        lock(&self.bus).write_i16(self.steer_id, Register::GoalPosition, steps as i16)?;
        self.steer_commanded += steps;
        Ok(())
    }

    fn drive_velocity(&mut self) -> Result<f64, HardwareError> {
        let steps = lock(&self.bus).velocity(self.drive_id)? as f64;
        Ok(self.drive_sign * steps / STEPS * self.meters_per_rev)
    }

    /// Accumulates wraps of the absolute encoder. Good as long as the wheel
    /// turns less than half a revolution between reads.
    fn drive_position(&mut self) -> Result<f64, HardwareError> {
        let raw = lock(&self.bus).position(self.drive_id)?;
        self.drive_steps += step_delta(self.last_drive_raw, raw);
        self.last_drive_raw = raw;
        Ok(self.drive_sign * self.drive_steps as f64 / STEPS * self.meters_per_rev)
    }

    fn steer_position(&mut self) -> Result<f64, HardwareError> {
        let raw = lock(&self.bus).position(self.steer_id)?;
        let steps = self.steer_unwrapped(raw);
        Ok(wrap_positive(steps as f64 / self.steps_per_radian()))
    }

    fn reset_drive_position(&mut self) -> Result<(), HardwareError> {
        self.last_drive_raw = lock(&self.bus).position(self.drive_id)?;
        self.drive_steps = 0;
        Ok(())
    }

    /// Zero drive speed, and a zero-step move that holds the steer servo where
    /// it is. Commanded steer position follows wherever the servo stopped.
    fn stop(&mut self) -> Result<(), HardwareError> {
        let steer_raw = {
            let mut bus = lock(&self.bus);
            bus.write_i16(self.drive_id, Register::GoalVelocity, 0)?;
            bus.write_i16(self.steer_id, Register::GoalPosition, 0)?;
            bus.position(self.steer_id)?
        };
        self.steer_commanded = self.steer_unwrapped(steer_raw);
        Ok(())
    }
}

impl<P: Read + Write> Drop for FeetechWheel<P> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop motors {}/{} on drop: {}", self.drive_id, self.steer_id, e);
        }
    }
}

/// Open the serial bus once and bring up all four modules on it
pub fn open_wheels(
    port: &str,
    config: &DriveConfig,
) -> Result<[FeetechWheel<Box<dyn serialport::SerialPort>>; MODULE_COUNT], HardwareError> {
    info!("Opening motor bus on {}", port);
    let bus = Arc::new(Mutex::new(FeetechBus::open(port)?));
    let [fl, fr, bl, br] = &config.modules;
    Ok([
        FeetechWheel::new(bus.clone(), fl, config)?,
        FeetechWheel::new(bus.clone(), fr, config)?,
        FeetechWheel::new(bus.clone(), bl, config)?,
        FeetechWheel::new(bus, br, config)?,
    ])
}
