// Swerve kinematics for a four-module base
// Converts chassis velocities to per-wheel speed/direction and back.

use nalgebra::{RowVector3, SMatrix, SVector};

use super::geometry::{
    ChassisDelta, ChassisVelocity, MODULE_COUNT, Translation, WheelPosition, WheelState,
};
use crate::config::ConfigError;

const WHEEL_ROWS: usize = 2 * MODULE_COUNT;

/// Maps chassis [vx, vy, omega] to stacked wheel vectors [v1x, v1y, v2x, ...]
type InverseMatrix = SMatrix<f64, WHEEL_ROWS, 3>;
/// Pseudoinverse of the above
type ForwardMatrix = SMatrix<f64, 3, WHEEL_ROWS>;

/// Swerve kinematics for fixed module geometry.
///
/// Each module at offset (dx, dy) from the vehicle center sees the wheel
/// velocity vector (vx - omega*dy, vy + omega*dx). Forward kinematics goes
/// back through the least-squares pseudoinverse of the same matrix, so with
/// disagreeing wheels (slip) it is a best fit rather than an exact inverse.
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    offsets: [Translation; MODULE_COUNT],
    forward: ForwardMatrix,
    /// Last commanded wheel angles, reused when the chassis is asked to stand still
    last_angles: [f64; MODULE_COUNT],
}

impl SwerveKinematics {
    /// Build kinematics for the given module offsets.
    ///
    /// Fails if the geometry cannot be inverted (e.g. all modules on one point).
    pub fn new(offsets: [Translation; MODULE_COUNT]) -> Result<Self, ConfigError> {
        let mut inverse = InverseMatrix::zeros();
        for (i, offset) in offsets.iter().enumerate() {
            inverse.set_row(2 * i, &RowVector3::new(1.0, 0.0, -offset.y));
            inverse.set_row(2 * i + 1, &RowVector3::new(0.0, 1.0, offset.x));
        }

        let normal = inverse.transpose() * inverse;
        if normal.determinant().abs() < 1e-9 {
            return Err(ConfigError::SingularGeometry);
        }
        let forward = normal
            .try_inverse()
            .ok_or(ConfigError::SingularGeometry)?
            * inverse.transpose();

        Ok(Self {
            offsets,
            forward,
            last_angles: [0.0; MODULE_COUNT],
        })
    }

    pub fn offsets(&self) -> &[Translation; MODULE_COUNT] {
        &self.offsets
    }

    /// Chassis velocity to wheel states.
    ///
    /// A chassis velocity of exactly zero keeps every wheel at its last
    /// commanded angle with zero speed, so the wheels do not snap back to 0.
    pub fn inverse(&mut self, chassis: ChassisVelocity) -> [WheelState; MODULE_COUNT] {
        if chassis.is_zero() {
            return self.last_angles.map(|angle| WheelState::new(0.0, angle));
        }

        let states = self.offsets.map(|offset| {
            let x = chassis.vx - chassis.omega * offset.y;
            let y = chassis.vy + chassis.omega * offset.x;
            WheelState::new(x.hypot(y), y.atan2(x))
        });

        self.last_angles = states.map(|s| s.angle);
        states
    }

    /// Vehicle-frame displacement from per-wheel distance deltas.
    ///
    /// `deltas[i].distance` is the distance wheel i covered since the last
    /// sample and `deltas[i].angle` its direction over that interval.
    pub fn forward(&self, deltas: &[WheelPosition; MODULE_COUNT]) -> ChassisDelta {
        let [dx, dy, dtheta] = self.solve(deltas.map(|d| (d.distance, d.angle)));
        ChassisDelta { dx, dy, dtheta }
    }

    /// Chassis velocity implied by measured wheel states
    pub fn to_chassis_velocity(&self, states: &[WheelState; MODULE_COUNT]) -> ChassisVelocity {
        let [vx, vy, omega] = self.solve(states.map(|s| (s.speed, s.angle)));
        ChassisVelocity { vx, vy, omega }
    }

    fn solve(&self, wheels: [(f64, f64); MODULE_COUNT]) -> [f64; 3] {
        let mut stacked = SVector::<f64, WHEEL_ROWS>::zeros();
        for (i, (magnitude, angle)) in wheels.iter().enumerate() {
            let (sin, cos) = angle.sin_cos();
            stacked[2 * i] = magnitude * cos;
            stacked[2 * i + 1] = magnitude * sin;
        }
        let chassis = self.forward * stacked;
        [chassis[0], chassis[1], chassis[2]]
    }
}

/// Scale every wheel speed down by the same factor so that none exceeds
/// `max_speed`. Angles are never changed, and the speed ratios between wheels
/// are preserved.
pub fn desaturate(
    states: [WheelState; MODULE_COUNT],
    max_speed: f64,
) -> [WheelState; MODULE_COUNT] {
    let fastest = states.iter().map(|s| s.speed.abs()).fold(0.0f64, f64::max);

    if fastest > max_speed {
        let scale = max_speed / fastest;
        states.map(|s| WheelState::new(s.speed * scale, s.angle))
    } else {
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, TAU};

    use crate::config::DriveConfig;

    const MAX_SPEED: f64 = 5.6;

    fn kinematics() -> SwerveKinematics {
        SwerveKinematics::new(DriveConfig::default().offsets()).unwrap()
    }

    #[test]
    fn test_full_speed_forward() {
        let states = kinematics().inverse(ChassisVelocity::new(MAX_SPEED, 0.0, 0.0));
        for state in states {
            assert_abs_diff_eq!(state.speed, MAX_SPEED, epsilon = 1e-12);
            assert_abs_diff_eq!(state.angle, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_pure_rotation_is_tangential() {
        let states = kinematics().inverse(ChassisVelocity::new(0.0, 0.0, TAU));
        let radius = 0.28575f64.hypot(0.28575);
        assert_abs_diff_eq!(radius, 0.4041, epsilon = 1e-3);

        for (state, offset) in states.iter().zip(DriveConfig::default().offsets()) {
            assert_abs_diff_eq!(state.speed, TAU * radius, epsilon = 1e-9);
            assert_abs_diff_eq!(state.speed, 2.539, epsilon = 1e-3);
            // Wheel direction is perpendicular to the center-to-wheel line
            let (sin, cos) = state.angle.sin_cos();
            assert_abs_diff_eq!(cos * offset.x + sin * offset.y, 0.0, epsilon = 1e-9);
        }

        // Front-left points back-left for counter-clockwise rotation
        assert_abs_diff_eq!(states[0].angle, 3.0 * FRAC_PI_4, epsilon = 1e-9);
        assert_abs_diff_eq!(states[3].angle, -FRAC_PI_4, epsilon = 1e-9);
    }

    #[test]
    fn test_strafe_left() {
        let states = kinematics().inverse(ChassisVelocity::new(0.0, 1.0, 0.0));
        for state in states {
            assert_abs_diff_eq!(state.speed, 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(state.angle, FRAC_PI_2, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_zero_velocity_keeps_last_angles() {
        let mut kinematics = kinematics();
        let moving = kinematics.inverse(ChassisVelocity::new(1.0, 1.0, 0.0));
        let stopped = kinematics.inverse(ChassisVelocity::default());
        for (m, s) in moving.iter().zip(stopped.iter()) {
            assert_eq!(s.speed, 0.0);
            assert_abs_diff_eq!(s.angle, m.angle);
            assert_abs_diff_eq!(s.angle, FRAC_PI_4, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_desaturate_bounds_every_input() {
        let mut kinematics = kinematics();
        for vx in [-5.6, -3.0, 0.0, 2.5, 5.6] {
            for vy in [-5.6, -1.0, 0.0, 4.0, 5.6] {
                for omega in [-TAU, -1.0, 0.0, 3.0, TAU] {
                    let raw = kinematics.inverse(ChassisVelocity::new(vx, vy, omega));
                    let states = desaturate(raw, MAX_SPEED);
                    for (state, before) in states.iter().zip(raw.iter()) {
                        assert!(state.speed.abs() <= MAX_SPEED + 1e-9);
                        assert_eq!(state.angle, before.angle);
                    }
                }
            }
        }
    }

    #[test]
    fn test_desaturate_preserves_ratios() {
        let raw = [
            WheelState::new(10.0, 0.1),
            WheelState::new(-5.0, 0.2),
            WheelState::new(2.5, 0.3),
            WheelState::new(0.0, 0.4),
        ];
        let states = desaturate(raw, 4.0);
        assert_abs_diff_eq!(states[0].speed, 4.0);
        assert_abs_diff_eq!(states[1].speed, -2.0);
        assert_abs_diff_eq!(states[2].speed, 1.0);
        assert_abs_diff_eq!(states[3].speed, 0.0);
    }

    #[test]
    fn test_desaturate_leaves_slow_states_alone() {
        let raw = [WheelState::new(1.0, PI); MODULE_COUNT];
        assert_eq!(desaturate(raw, MAX_SPEED), raw);
    }

    #[test]
    fn test_forward_inverts_inverse() {
        let mut kinematics = kinematics();
        let chassis = ChassisVelocity::new(1.2, -0.7, 0.9);
        let states = kinematics.inverse(chassis);
        let recovered = kinematics.to_chassis_velocity(&states);
        assert_abs_diff_eq!(recovered.vx, chassis.vx, epsilon = 1e-9);
        assert_abs_diff_eq!(recovered.vy, chassis.vy, epsilon = 1e-9);
        assert_abs_diff_eq!(recovered.omega, chassis.omega, epsilon = 1e-9);

        let dt = 0.02;
        let deltas = states.map(|s| WheelPosition::new(s.speed * dt, s.angle));
        let delta = kinematics.forward(&deltas);
        assert_abs_diff_eq!(delta.dx, chassis.vx * dt, epsilon = 1e-9);
        assert_abs_diff_eq!(delta.dy, chassis.vy * dt, epsilon = 1e-9);
        assert_abs_diff_eq!(delta.dtheta, chassis.omega * dt, epsilon = 1e-9);
    }

    #[test]
    fn test_forward_averages_slipping_wheel() {
        let kinematics = kinematics();
        // Three wheels agree on 1 m forward, one wheel slipped and reports 2 m
        let mut deltas = [WheelPosition::new(1.0, 0.0); MODULE_COUNT];
        deltas[0].distance = 2.0;
        let delta = kinematics.forward(&deltas);
        assert_abs_diff_eq!(delta.dx, 1.25, epsilon = 1e-9);
    }

    #[test]
    fn test_rejects_collinear_geometry() {
        let offsets = [Translation::new(0.0, 0.0); MODULE_COUNT];
        assert!(matches!(
            SwerveKinematics::new(offsets),
            Err(ConfigError::SingularGeometry)
        ));
    }
}
