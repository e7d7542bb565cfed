// Top-level swerve drive controller
//
// Per cycle: shape inputs -> frame conversion -> kinematics -> desaturation
// -> per-module dispatch, then odometry from the same sensor snapshot.

use std::time::Instant;

use tracing::{info, warn};

use super::calibration::{CalibrationAction, CalibrationState, HeadingCalibration};
use super::geometry::{ChassisVelocity, MODULE_COUNT, Pose, WheelPosition, WheelState};
use super::heading::{HeadingSample, HeadingSource};
use super::kinematics::{SwerveKinematics, desaturate};
use super::module::WheelModule;
use super::odometry::{Odometry, SensorSnapshot};
use super::shaper::InputShaper;
use super::{DriveError, Periodic};
use crate::config::DriveConfig;
use crate::hardware::{Gyro, WheelHardware};

/// Wheel angles (degrees) for the defensive X: front-left, front-right,
/// back-left, back-right
const LOCK_ANGLES_DEG: [f64; MODULE_COUNT] = [45.0, -45.0, -45.0, 45.0];

/// Four-module swerve drive
pub struct DriveController<H, G> {
    config: DriveConfig,
    modules: [WheelModule<H>; MODULE_COUNT],
    heading: HeadingSource<G>,
    kinematics: SwerveKinematics,
    shaper: InputShaper,
    odometry: Odometry,
    calibration: HeadingCalibration,
    /// Set once odometry has been advanced in the current cycle
    odometry_updated: bool,
    fallback_warned: bool,
}

impl<H: WheelHardware, G: Gyro> DriveController<H, G> {
    /// Build the drive from its configuration and hardware, modules in
    /// [front-left, front-right, back-left, back-right] order.
    ///
    /// Refuses to start on an invalid configuration. Heading calibration
    /// starts counting from `now`.
    pub fn new(
        config: DriveConfig,
        hardware: [H; MODULE_COUNT],
        gyro: G,
        now: Instant,
    ) -> Result<Self, DriveError> {
        config.validate()?;
        let kinematics = SwerveKinematics::new(config.offsets())?;

        let module = |i: usize, hardware: H| {
            let module = &config.modules[i];
            WheelModule::new(
                module.name.clone(),
                hardware,
                module.calibration_offset,
                config.max_speed,
            )
        };
        let [fl, fr, bl, br] = hardware;
        let modules = [module(0, fl), module(1, fr), module(2, bl), module(3, br)];

        info!(
            "Drive configured: max {:.2} m/s, {:.2} rad/s, {:?} cycle",
            config.max_speed, config.max_angular_speed, config.loop_period
        );

        Ok(Self {
            shaper: InputShaper::new(
                config.magnitude_slew_rate,
                config.rotational_slew_rate,
                config.dt(),
            ),
            odometry: Odometry::new(kinematics.clone(), Pose::default()),
            calibration: HeadingCalibration::new(
                now,
                config.heading_settle,
                config.heading_calibration_timeout,
            ),
            heading: HeadingSource::new(gyro),
            kinematics,
            modules,
            config,
            odometry_updated: false,
            fallback_warned: false,
        })
    }

    /// Drive with normalized inputs in [-1, 1].
    ///
    /// * `x` - Forward (positive = forward)
    /// * `y` - Lateral (positive = left)
    /// * `rot` - Rotation (positive = counter-clockwise)
    /// * `field_relative` - Interpret x/y along world axes instead of the
    ///   vehicle's own. Ignored until heading calibration has completed.
    pub fn drive(
        &mut self,
        x: f64,
        y: f64,
        rot: f64,
        field_relative: bool,
    ) -> Result<(), DriveError> {
        let (x, y, rot) = self
            .shaper
            .shape(x.clamp(-1.0, 1.0), y.clamp(-1.0, 1.0), rot.clamp(-1.0, 1.0));
        let requested = ChassisVelocity::new(
            x * self.config.max_speed,
            y * self.config.max_speed,
            rot * self.config.max_angular_speed,
        );

        let snapshot = self.sample()?;

        let chassis = if field_relative && self.world_relative_allowed() {
            ChassisVelocity::from_world_relative(requested, snapshot.heading.angle)
        } else {
            requested
        };

        let states = self.kinematics.inverse(chassis);
        self.set_module_states(states)?;

        self.odometry.update(&snapshot);
        self.odometry_updated = true;
        Ok(())
    }

    /// Send wheel states straight to the modules, desaturated first
    pub fn set_module_states(
        &mut self,
        states: [WheelState; MODULE_COUNT],
    ) -> Result<(), DriveError> {
        let states = desaturate(states, self.config.max_speed);
        for (module, state) in self.modules.iter_mut().zip(states) {
            module.set_desired_state(state)?;
        }
        Ok(())
    }

    /// Point the wheels in an X so the base resists being pushed.
    /// Bypasses shaping and kinematics entirely.
    pub fn lock(&mut self) -> Result<(), DriveError> {
        for (module, angle) in self.modules.iter_mut().zip(LOCK_ANGLES_DEG) {
            module.set_desired_state(WheelState::new(0.0, angle.to_radians()))?;
        }
        Ok(())
    }

    /// Zero both actuators on every module. The shapers restart from rest.
    pub fn stop(&mut self) -> Result<(), DriveError> {
        self.shaper.reset();
        for module in &mut self.modules {
            module.stop()?;
        }
        Ok(())
    }

    /// Make the current direction the heading zero. The pose is left as it
    /// is; odometry re-anchors to the new reference.
    pub fn zero_heading(&mut self) {
        self.rezero_heading();
        self.calibration.mark_ready();
    }

    /// Teleport the pose estimate, e.g. after absolute re-localization
    pub fn reset_pose(&mut self, pose: Pose) -> Result<(), DriveError> {
        let snapshot = self.sample()?;
        self.odometry.reset_pose(pose, &snapshot);
        info!(
            "Pose reset to ({:.3}, {:.3}, {:.3})",
            pose.x, pose.y, pose.heading
        );
        Ok(())
    }

    /// Zero every module's distance counter. Call only while stationary.
    pub fn reset_distances(&mut self) -> Result<(), DriveError> {
        for module in &mut self.modules {
            module.reset_distance()?;
        }
        // Re-seed so the jump back to zero is not read as motion
        let snapshot = self.sample()?;
        self.odometry.reset_pose(self.odometry.pose(), &snapshot);
        Ok(())
    }

    pub fn pose(&self) -> Pose {
        self.odometry.pose()
    }

    pub fn module_states(&mut self) -> Result<[WheelState; MODULE_COUNT], DriveError> {
        let mut states = [WheelState::default(); MODULE_COUNT];
        for (state, module) in states.iter_mut().zip(self.modules.iter_mut()) {
            *state = module.state()?;
        }
        Ok(states)
    }

    pub fn module_positions(&mut self) -> Result<[WheelPosition; MODULE_COUNT], DriveError> {
        let mut positions = [WheelPosition::default(); MODULE_COUNT];
        for (position, module) in positions.iter_mut().zip(self.modules.iter_mut()) {
            *position = module.position()?;
        }
        Ok(positions)
    }

    /// Last states sent to the modules (vehicle frame, before optimization)
    pub fn desired_states(&self) -> [WheelState; MODULE_COUNT] {
        std::array::from_fn(|i| self.modules[i].desired_state())
    }

    /// Chassis velocity implied by the measured module states
    pub fn chassis_velocity(&mut self) -> Result<ChassisVelocity, DriveError> {
        let states = self.module_states()?;
        Ok(self.kinematics.to_chassis_velocity(&states))
    }

    /// Mean absolute distance covered by the modules since the last reset
    pub fn average_distance(&mut self) -> Result<f64, DriveError> {
        let positions = self.module_positions()?;
        Ok(positions.iter().map(|p| p.distance.abs()).sum::<f64>() / MODULE_COUNT as f64)
    }

    /// Raw hardware steer angles. With every wheel physically pointed
    /// forward, these are the calibration offsets to configure.
    pub fn calibration_report(&mut self) -> Result<[(String, f64); MODULE_COUNT], DriveError> {
        let mut report: [(String, f64); MODULE_COUNT] = Default::default();
        for (entry, module) in report.iter_mut().zip(self.modules.iter_mut()) {
            *entry = (module.name().to_string(), module.raw_steer_angle()?);
        }
        Ok(report)
    }

    /// Heading in degrees, (-180, 180]
    pub fn heading_degrees(&self) -> f64 {
        self.heading.degrees()
    }

    /// Turn rate in rad/s, counter-clockwise positive
    pub fn turn_rate(&self) -> f64 {
        self.heading.last().rate
    }

    pub fn heading(&self) -> HeadingSample {
        self.heading.last()
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.calibration.state()
    }

    /// True once world-relative driving is meaningful
    pub fn is_ready(&self) -> bool {
        self.calibration.is_ready()
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Read heading and all wheel positions exactly once
    fn sample(&mut self) -> Result<SensorSnapshot, DriveError> {
        let heading = self.heading.sample();
        let positions = self.module_positions()?;
        Ok(SensorSnapshot { heading, positions })
    }

    fn rezero_heading(&mut self) {
        let before = self.heading.sample().angle;
        self.heading.zero();
        self.odometry.rebase_heading(before, 0.0);
    }

    fn world_relative_allowed(&mut self) -> bool {
        if self.calibration.is_ready() {
            return true;
        }
        if !self.fallback_warned {
            warn!(
                "World-relative drive requested while heading is {:?}, driving vehicle-relative",
                self.calibration.state()
            );
            self.fallback_warned = true;
        }
        false
    }
}

impl<H: WheelHardware, G: Gyro> Periodic for DriveController<H, G> {
    /// Close out the control cycle: advance odometry if `drive` did not
    /// already, and poll heading calibration.
    fn tick(&mut self, now: Instant) -> Result<(), DriveError> {
        if !self.odometry_updated {
            let snapshot = self.sample()?;
            self.odometry.update(&snapshot);
        }
        self.odometry_updated = false;

        let connected = self.heading.last().connected;
        if self.calibration.poll(now, connected) == CalibrationAction::ZeroHeading {
            self.rezero_heading();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};
    use std::time::Duration;

    use crate::drive::geometry::wrap_angle;
    use crate::hardware::HardwareError;
    use crate::sim::{SimGyro, SimWheel};

    type SimDrive = DriveController<SimWheel, SimGyro>;

    struct Rig {
        drive: SimDrive,
        wheels: [SimWheel; MODULE_COUNT],
        gyro: SimGyro,
        now: Instant,
    }

    impl Rig {
        fn new() -> Self {
            Self::with_config(DriveConfig::default())
        }

        fn with_config(config: DriveConfig) -> Self {
            let wheels = [0; MODULE_COUNT].map(|_| SimWheel::new(config.max_speed));
            let gyro = SimGyro::new();
            let now = Instant::now();
            let drive = DriveController::new(config, wheels.clone(), gyro.clone(), now).unwrap();
            Self {
                drive,
                wheels,
                gyro,
                now,
            }
        }

        /// One control cycle of driving, then the wheels move for one period
        fn cycle(&mut self, x: f64, y: f64, rot: f64, field_relative: bool) {
            self.drive.drive(x, y, rot, field_relative).unwrap();
            self.now += self.drive.config().loop_period;
            self.drive.tick(self.now).unwrap();
            let dt = self.drive.config().dt();
            for wheel in &self.wheels {
                wheel.advance(dt);
            }
        }

        /// Hold a command, then ramp back to rest
        fn segment(&mut self, x: f64, y: f64, cycles: usize) {
            for _ in 0..cycles {
                self.cycle(x, y, 0.0, false);
            }
            for _ in 0..50 {
                self.cycle(0.0, 0.0, 0.0, false);
            }
        }
    }

    fn assert_states_eq(a: &[WheelState; MODULE_COUNT], b: &[WheelState; MODULE_COUNT]) {
        for (a, b) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(a.speed, b.speed, epsilon = 1e-9);
            assert_abs_diff_eq!(a.angle, b.angle, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = DriveConfig::default();
        config.modules[2].offset = config.modules[1].offset;
        let wheels = [0; MODULE_COUNT].map(|_| SimWheel::new(5.6));
        let result = DriveController::new(config, wheels, SimGyro::new(), Instant::now());
        assert!(matches!(result, Err(DriveError::Config(_))));
    }

    #[test]
    fn test_drive_is_shaped() {
        let mut rig = Rig::new();
        rig.drive.drive(1.0, 0.0, 0.0, false).unwrap();
        // One cycle at 1.8/s and 50 Hz: 3.6% of max speed
        for state in rig.drive.desired_states() {
            assert_abs_diff_eq!(state.speed, 0.036 * 5.6, epsilon = 1e-9);
        }
        for wheel in &rig.wheels {
            assert_abs_diff_eq!(wheel.drive_output(), 0.036, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_wheel_speeds_never_exceed_max() {
        let mut rig = Rig::new();
        for _ in 0..100 {
            rig.cycle(1.0, 1.0, 1.0, false);
            for state in rig.drive.desired_states() {
                assert!(state.speed.abs() <= 5.6 + 1e-9);
            }
            for wheel in &rig.wheels {
                assert!(wheel.drive_output().abs() <= 1.0 + 1e-9);
            }
        }
    }

    #[test]
    fn test_world_relative_matches_vehicle_relative_at_zero_heading() {
        let mut world = Rig::new();
        let mut vehicle = Rig::new();
        world.drive.zero_heading();
        vehicle.drive.zero_heading();

        for (x, y, rot) in [(0.5, 0.2, 0.1), (-0.3, 0.7, -0.4), (1.0, -1.0, 1.0)] {
            for _ in 0..10 {
                world.cycle(x, y, rot, true);
                vehicle.cycle(x, y, rot, false);
                assert_states_eq(&world.drive.desired_states(), &vehicle.drive.desired_states());
            }
        }
    }

    #[test]
    fn test_world_relative_rotates_by_heading() {
        let mut rig = Rig::new();
        rig.drive.zero_heading();
        rig.gyro.set_heading(FRAC_PI_2);

        for _ in 0..100 {
            rig.cycle(0.5, 0.0, 0.0, true);
        }
        // Facing world +y, so world +x is to the vehicle's right
        for state in rig.drive.desired_states() {
            assert_abs_diff_eq!(state.speed, 0.5 * 5.6, epsilon = 1e-9);
            assert_abs_diff_eq!(state.angle, -FRAC_PI_2, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_world_relative_waits_for_calibration() {
        let mut rig = Rig::new();
        rig.gyro.set_heading(FRAC_PI_2);
        assert_eq!(rig.drive.calibration_state(), CalibrationState::Pending);

        rig.drive.drive(0.5, 0.0, 0.0, true).unwrap();
        for state in rig.drive.desired_states() {
            assert_abs_diff_eq!(state.angle, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_calibration_zeroes_heading_after_settle() {
        let mut rig = Rig::new();
        rig.gyro.set_heading(0.4);

        let start = rig.now;
        rig.drive.tick(start).unwrap();
        assert!(!rig.drive.is_ready());

        rig.drive.tick(start + Duration::from_secs(1)).unwrap();
        assert!(rig.drive.is_ready());
        rig.drive.tick(start + Duration::from_millis(1020)).unwrap();
        assert_abs_diff_eq!(rig.drive.heading().angle, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rig.drive.heading_degrees(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_calibration_falls_back_without_sensor() {
        let mut rig = Rig::new();
        rig.gyro.set_connected(false);
        let start = rig.now;
        rig.drive.tick(start + Duration::from_secs(6)).unwrap();
        assert_eq!(rig.drive.calibration_state(), CalibrationState::Fallback);
        assert!(!rig.drive.heading().connected);

        // Manual zero once the sensor is back re-enables world-relative driving
        rig.gyro.set_connected(true);
        rig.drive.zero_heading();
        assert!(rig.drive.is_ready());
    }

    #[test]
    fn test_lock_forms_x() {
        let mut rig = Rig::new();
        for _ in 0..20 {
            rig.cycle(0.3, -0.6, 0.5, false);
        }
        rig.drive.lock().unwrap();

        let expected = [FRAC_PI_4, -FRAC_PI_4, -FRAC_PI_4, FRAC_PI_4];
        for (state, angle) in rig.drive.desired_states().iter().zip(expected) {
            assert_eq!(state.speed, 0.0);
            assert_abs_diff_eq!(state.angle, angle, epsilon = 1e-12);
        }
        for wheel in &rig.wheels {
            assert_eq!(wheel.drive_output().abs(), 0.0);
        }
        // Measured wheel directions match up to a half-turn (optimization may flip)
        for (state, angle) in rig.drive.module_states().unwrap().iter().zip(expected) {
            let diff = wrap_angle(state.angle - angle);
            assert!(diff.abs() < 1e-9 || (diff.abs() - PI).abs() < 1e-9);
        }
    }

    #[test]
    fn test_lock_differs_from_zero_drive() {
        let mut rig = Rig::new();
        rig.drive.drive(0.0, 0.0, 0.0, false).unwrap();
        let stopped = rig.drive.desired_states();
        for state in stopped {
            assert_eq!(state, WheelState::new(0.0, 0.0));
        }

        rig.drive.lock().unwrap();
        assert_ne!(rig.drive.desired_states(), stopped);
    }

    #[test]
    fn test_zero_drive_keeps_wheel_angles() {
        let mut rig = Rig::new();
        rig.segment(0.0, 0.3, 10);
        // After ramping to rest the wheels still point sideways
        for state in rig.drive.desired_states() {
            assert_eq!(state.speed, 0.0);
            assert_abs_diff_eq!(state.angle, FRAC_PI_2, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_stop_and_lock_are_idempotent() {
        let mut rig = Rig::new();
        rig.drive.stop().unwrap();
        rig.drive.stop().unwrap();
        rig.drive.lock().unwrap();
        let locked = rig.drive.desired_states();
        rig.drive.lock().unwrap();
        assert_eq!(rig.drive.desired_states(), locked);
    }

    #[test]
    fn test_stop_resets_shaping() {
        let mut rig = Rig::new();
        for _ in 0..30 {
            rig.cycle(1.0, 0.0, 0.0, false);
        }
        rig.drive.stop().unwrap();
        for wheel in &rig.wheels {
            assert_eq!(wheel.drive_output(), 0.0);
        }
        rig.drive.drive(1.0, 0.0, 0.0, false).unwrap();
        for wheel in &rig.wheels {
            assert_abs_diff_eq!(wheel.drive_output(), 0.036, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_closed_square_returns_home() {
        let mut rig = Rig::new();
        // 45 cycles at 20% of 5.6 m/s is about 1 m each way
        rig.segment(0.2, 0.0, 45);
        let corner = rig.drive.pose();
        assert_abs_diff_eq!(corner.x, 1.0, epsilon = 0.1);
        assert_abs_diff_eq!(corner.y, 0.0, epsilon = 1e-6);

        rig.segment(0.0, 0.2, 45);
        rig.segment(-0.2, 0.0, 45);
        rig.segment(0.0, -0.2, 45);

        let pose = rig.drive.pose();
        assert!(pose.distance_to(&Pose::default()) < 0.05, "ended at {pose:?}");
        assert_abs_diff_eq!(pose.heading, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tick_advances_odometry_without_drive() {
        let mut rig = Rig::new();
        rig.cycle(0.0, 0.0, 0.0, false);
        // Wheels move 1 m outside the drive path; tick alone must pick it up once
        for wheel in &rig.wheels {
            wheel.set_distance(1.0);
        }
        rig.drive.tick(rig.now).unwrap();
        rig.drive.tick(rig.now).unwrap();
        assert_abs_diff_eq!(rig.drive.pose().x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_reset_pose() {
        let mut rig = Rig::new();
        rig.segment(0.2, 0.0, 20);
        let target = Pose::new(3.0, 4.0, FRAC_PI_2);
        rig.drive.reset_pose(target).unwrap();
        assert_eq!(rig.drive.pose(), target);

        // Forward in the vehicle frame is now world +y
        rig.segment(0.2, 0.0, 20);
        let pose = rig.drive.pose();
        assert_abs_diff_eq!(pose.x, 3.0, epsilon = 1e-6);
        assert!(pose.y > 4.2);
        assert_abs_diff_eq!(pose.heading, FRAC_PI_2, epsilon = 1e-9);
    }

    #[test]
    fn test_reset_distances_does_not_move_pose() {
        let mut rig = Rig::new();
        rig.segment(0.2, 0.0, 20);
        let before = rig.drive.pose();
        assert!(rig.drive.average_distance().unwrap() > 0.1);

        rig.drive.reset_distances().unwrap();
        assert_eq!(rig.drive.average_distance().unwrap(), 0.0);
        rig.cycle(0.0, 0.0, 0.0, false);
        assert_eq!(rig.drive.pose(), before);
    }

    #[test]
    fn test_zero_heading_keeps_pose() {
        let mut rig = Rig::new();
        rig.drive.zero_heading();
        rig.cycle(0.0, 0.0, 0.0, false);
        rig.gyro.set_heading(0.7);
        rig.cycle(0.0, 0.0, 0.0, false);
        assert_abs_diff_eq!(rig.drive.pose().heading, 0.7, epsilon = 1e-9);

        rig.drive.zero_heading();
        rig.cycle(0.0, 0.0, 0.0, false);
        assert_abs_diff_eq!(rig.drive.heading().angle, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rig.drive.pose().heading, 0.7, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_heading_keeps_rotation_since_last_cycle() {
        let mut rig = Rig::new();
        rig.drive.zero_heading();
        rig.cycle(0.0, 0.0, 0.0, false);

        // Turns between cycles and is re-zeroed before odometry sees it
        rig.gyro.rotate(0.3);
        rig.drive.zero_heading();
        rig.cycle(0.0, 0.0, 0.0, false);
        assert_abs_diff_eq!(rig.drive.heading().angle, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rig.drive.pose().heading, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_measured_chassis_velocity() {
        let mut rig = Rig::new();
        for _ in 0..60 {
            rig.cycle(0.5, 0.0, 0.0, false);
        }
        let velocity = rig.drive.chassis_velocity().unwrap();
        assert_abs_diff_eq!(velocity.vx, 0.5 * 5.6, epsilon = 1e-9);
        assert_abs_diff_eq!(velocity.vy, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(velocity.omega, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_calibration_report_reads_raw_angles() {
        let mut config = DriveConfig::default();
        config.modules[1].calibration_offset = 0.25;
        let mut rig = Rig::with_config(config);
        rig.drive.lock().unwrap();
        let report = rig.drive.calibration_report().unwrap();
        assert_eq!(report[1].0, "front_right");
        let raw = report[1].1;
        let vehicle = rig.drive.module_states().unwrap()[1].angle;
        assert_abs_diff_eq!(wrap_angle(raw - vehicle), 0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_hardware_errors_propagate() {
        let mut rig = Rig::new();
        rig.wheels[2].fail_next("steer encoder");
        let result = rig.drive.drive(0.5, 0.0, 0.0, false);
        assert!(matches!(
            result,
            Err(DriveError::Hardware(HardwareError::Disconnected { .. }))
        ));
    }
}
