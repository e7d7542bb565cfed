// Swerve odometry: dead-reckoned pose from heading + wheel positions

use super::geometry::{MODULE_COUNT, Pose, WheelPosition, rotate, wrap_angle};
use super::heading::HeadingSample;
use super::kinematics::SwerveKinematics;

/// Heading and wheel positions sampled once at the start of a cycle's
/// data-fusion step. Everything in that cycle reads this copy instead of
/// going back to the sensors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSnapshot {
    pub heading: HeadingSample,
    pub positions: [WheelPosition; MODULE_COUNT],
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Tracking {
    Uninitialized,
    Tracking {
        positions: [WheelPosition; MODULE_COUNT],
    },
}

/// Integrates snapshots into a world-frame pose estimate.
///
/// The pose heading follows the heading source, shifted by a fixed offset so
/// a reset can put the pose at any heading without touching the sensor.
#[derive(Debug, Clone)]
pub struct Odometry {
    kinematics: SwerveKinematics,
    pose: Pose,
    /// Pose heading minus sensor heading
    heading_offset: f64,
    previous: Tracking,
}

impl Odometry {
    pub fn new(kinematics: SwerveKinematics, initial: Pose) -> Self {
        Self {
            kinematics,
            pose: initial,
            heading_offset: 0.0,
            previous: Tracking::Uninitialized,
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.previous, Tracking::Tracking { .. })
    }

    /// Advance the pose by the motion between the previous snapshot and this one.
    ///
    /// The first call only seeds the previous snapshot. The displacement is
    /// rotated into the world frame with the heading at the start of the
    /// interval.
    pub fn update(&mut self, snapshot: &SensorSnapshot) -> Pose {
        let current_heading = snapshot.heading.angle;

        let Tracking::Tracking { positions } = self.previous else {
            self.seed(snapshot);
            return self.pose;
        };

        let deltas: [WheelPosition; MODULE_COUNT] = std::array::from_fn(|i| {
            WheelPosition::new(
                snapshot.positions[i].distance - positions[i].distance,
                snapshot.positions[i].angle,
            )
        });
        let delta = self.kinematics.forward(&deltas);

        let (dx, dy) = rotate(delta.dx, delta.dy, self.pose.heading);
        self.pose = Pose::new(
            self.pose.x + dx,
            self.pose.y + dy,
            current_heading + self.heading_offset,
        );

        self.previous = Tracking::Tracking {
            positions: snapshot.positions,
        };
        self.pose
    }

    /// Teleport the pose and re-seed the snapshot in one step
    pub fn reset_pose(&mut self, pose: Pose, snapshot: &SensorSnapshot) {
        self.pose = Pose::new(pose.x, pose.y, pose.heading);
        self.seed(snapshot);
    }

    /// The heading source jumped from `from` to `to` without the robot
    /// turning. Re-anchor the offset so the jump is not read as rotation.
    /// Rotation up to `from` since the last update still reaches the pose.
    pub fn rebase_heading(&mut self, from: f64, to: f64) {
        self.heading_offset = wrap_angle(self.heading_offset + from - to);
    }

    fn seed(&mut self, snapshot: &SensorSnapshot) {
        self.heading_offset = wrap_angle(self.pose.heading - snapshot.heading.angle);
        self.previous = Tracking::Tracking {
            positions: snapshot.positions,
        };
    }
}
