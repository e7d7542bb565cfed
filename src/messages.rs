// Message types exchanged over the bus

use serde::{Deserialize, Serialize};

use crate::drive::{CalibrationState, Pose, WheelState};

/// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriveCommand {
    /// Normalized inputs in [-1, 1]; x forward, y left, rot counter-clockwise
    Drive {
        x: f64,
        y: f64,
        rot: f64,
        #[serde(default)]
        field_relative: bool,
    },
    Lock,
    Stop,
    ZeroHeading,
    ResetPose {
        x: f64,
        y: f64,
        heading: f64,
    },
    ResetDistances,
}

impl DriveCommand {
    /// Continuous commands have to keep arriving or the watchdog stops the
    /// base. The rest act once when received.
    pub fn is_continuous(&self) -> bool {
        matches!(self, DriveCommand::Drive { .. } | DriveCommand::Lock)
    }
}

/// Heading sample from the IMU node, sensor convention (clockwise positive)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// Continuous yaw, radians
    pub yaw: f64,
    /// rad/s
    #[serde(default)]
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseReport {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub heading_degrees: f64,
    pub turn_rate: f64,
}

impl PoseReport {
    pub fn new(pose: Pose, heading_degrees: f64, turn_rate: f64) -> Self {
        Self {
            x: pose.x,
            y: pose.y,
            heading: pose.heading,
            heading_degrees,
            turn_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleReport {
    /// Measured states, vehicle frame
    pub states: Vec<WheelState>,
    /// Last commanded states, vehicle frame
    pub desired: Vec<WheelState>,
    pub average_distance: f64,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    /// Heading calibration still pending
    Calibrating,
    /// Heading calibration gave up; world-relative driving is off
    HeadingFallback,
}

impl RuntimeHealth {
    /// A stale command outranks calibration status
    pub fn assess(cmd_stale: bool, calibration: CalibrationState) -> Self {
        match (cmd_stale, calibration) {
            (true, _) => RuntimeHealth::CmdStale,
            (false, CalibrationState::Pending) => RuntimeHealth::Calibrating,
            (false, CalibrationState::Fallback) => RuntimeHealth::HeadingFallback,
            (false, CalibrationState::Ready) => RuntimeHealth::Ok,
        }
    }
}
