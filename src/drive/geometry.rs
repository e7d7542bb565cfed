// Data model shared by the drive core: chassis velocities, wheel states,
// wheel positions, poses and the angle helpers they rely on.

use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

/// Number of swerve modules on the base. Order is always
/// [front-left, front-right, back-left, back-right].
pub const MODULE_COUNT: usize = 4;

/// Wrap an angle into (-PI, PI]
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// Wrap an angle into [0, 2*PI)
pub fn wrap_positive(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    // rem_euclid can round up to TAU for tiny negative inputs
    if wrapped >= TAU { 0.0 } else { wrapped }
}

/// Rotate a 2-D vector counter-clockwise by `angle` radians
pub fn rotate(x: f64, y: f64, angle: f64) -> (f64, f64) {
    let (sin, cos) = angle.sin_cos();
    (x * cos - y * sin, x * sin + y * cos)
}

/// Desired vehicle motion. Whether it is vehicle- or world-relative is
/// carried separately by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisVelocity {
    /// Forward velocity in m/s (positive = forward)
    pub vx: f64,
    /// Lateral velocity in m/s (positive = left)
    pub vy: f64,
    /// Angular velocity in rad/s (positive = counter-clockwise)
    pub omega: f64,
}

impl ChassisVelocity {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    pub fn is_zero(&self) -> bool {
        self.vx == 0.0 && self.vy == 0.0 && self.omega == 0.0
    }

    /// Convert a world-relative velocity into the vehicle frame given the
    /// vehicle heading in the world frame.
    pub fn from_world_relative(world: ChassisVelocity, heading: f64) -> Self {
        let (vx, vy) = rotate(world.vx, world.vy, -heading);
        Self { vx, vy, omega: world.omega }
    }
}

/// Incremental vehicle-frame displacement over one sample interval
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChassisDelta {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

/// Offset of a module from the vehicle center, in meters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub x: f64,
    pub y: f64,
}

impl Translation {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn distance_to(&self, other: &Translation) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Speed and direction of a single wheel
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WheelState {
    /// Signed wheel speed in m/s
    pub speed: f64,
    /// Wheel direction in radians, vehicle frame
    pub angle: f64,
}

impl WheelState {
    pub fn new(speed: f64, angle: f64) -> Self {
        Self { speed, angle }
    }

    /// Pick the equivalent (speed, angle) pair that needs the least steering
    /// from `current`. The returned angle is wrapped into [0, 2*PI) and the
    /// steering needed to reach it is at most PI/2.
    pub fn optimize(self, current: f64) -> Self {
        let delta = wrap_angle(self.angle - current);
        if delta.abs() > PI / 2.0 {
            Self {
                speed: -self.speed,
                angle: wrap_positive(self.angle + PI),
            }
        } else {
            Self {
                speed: self.speed,
                angle: wrap_positive(self.angle),
            }
        }
    }
}

/// Cumulative distance and current direction of a single wheel
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WheelPosition {
    /// Cumulative signed distance in meters since the last reset
    pub distance: f64,
    /// Wheel direction in radians, vehicle frame
    pub angle: f64,
}

impl WheelPosition {
    pub fn new(distance: f64, angle: f64) -> Self {
        Self { distance, angle }
    }
}

/// Estimated vehicle position and orientation in the world frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Heading in radians, wrapped into (-PI, PI]
    pub heading: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self {
            x,
            y,
            heading: wrap_angle(heading),
        }
    }

    pub fn distance_to(&self, other: &Pose) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}
