// Timeouts, topics, drive configuration
use std::f64::consts::TAU;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drive::geometry::{MODULE_COUNT, Translation};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Heading samples older than this mark the remote gyro as disconnected
pub const IMU_TIMEOUT: Duration = Duration::from_millis(200);

// Zenoh topics
pub const TOPIC_CMD_BASE: &str = "swerve/cmd/base"; // commands
pub const TOPIC_IMU: &str = "swerve/sensor/imu"; // heading samples
pub const TOPIC_POSE: &str = "swerve/state/pose"; // odometry
pub const TOPIC_MODULES: &str = "swerve/state/modules"; // per-module feedback
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Serial port for Feetech motor controller
pub const MOTOR_PORT: &str = "/dev/ttyACM0";

/// Error types for invalid drive configuration. All of them are fatal at
/// construction time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be positive and finite, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must be finite, got {value}")]
    NotFinite { field: &'static str, value: f64 },

    #[error("module {name} sits on the vehicle center")]
    ZeroOffset { name: String },

    #[error("modules {a} and {b} share the same offset")]
    DuplicateOffset { a: String, b: String },

    #[error("module geometry gives a singular kinematics matrix")]
    SingularGeometry,

    #[error("heading calibration timeout ({timeout:?}) must exceed settle time ({settle:?})")]
    CalibrationWindow { settle: Duration, timeout: Duration },

    #[error("motor id {id} is assigned twice")]
    DuplicateMotorId { id: u8 },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Steering loop gains, passed through to the steer actuator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self { p: 1.0, i: 0.0, d: 0.0 }
    }
}

/// Per-module configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    /// Offset from the vehicle center (x forward, y left), meters
    pub offset: Translation,
    /// Hardware steer angle (radians) at which the wheel points forward
    pub calibration_offset: f64,
    pub drive_motor_id: u8,
    pub steer_motor_id: u8,
    #[serde(default)]
    pub drive_inverted: bool,
}

/// Immutable drive configuration, handed to every component at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// [front-left, front-right, back-left, back-right]
    pub modules: [ModuleConfig; MODULE_COUNT],
    /// Max wheel speed in m/s
    pub max_speed: f64,
    /// Max chassis angular speed in rad/s
    pub max_angular_speed: f64,
    /// Translation input slew rate, fraction of full scale per second
    pub magnitude_slew_rate: f64,
    /// Rotation input slew rate, fraction of full scale per second
    pub rotational_slew_rate: f64,
    pub wheel_diameter: f64,
    pub drive_gear_ratio: f64,
    pub steer_gear_ratio: f64,
    pub steer_gains: PidGains,
    /// Amps
    pub drive_current_limit: u16,
    /// Amps
    pub steer_current_limit: u16,
    #[serde(with = "millis")]
    pub loop_period: Duration,
    /// How long the gyro must be connected and still before it is zeroed
    #[serde(with = "millis")]
    pub heading_settle: Duration,
    /// Give up on heading calibration after this long and drive vehicle-relative
    #[serde(with = "millis")]
    pub heading_calibration_timeout: Duration,
}

// Wheelbase and track width are both 22.5 in
const HALF_WHEELBASE: f64 = 0.5715 / 2.0;
const HALF_TRACK_WIDTH: f64 = 0.5715 / 2.0;

impl Default for DriveConfig {
    fn default() -> Self {
        let module = |name: &str, x: f64, y: f64, drive_motor_id: u8| ModuleConfig {
            name: name.to_string(),
            offset: Translation::new(x, y),
            calibration_offset: 0.0,
            drive_motor_id,
            steer_motor_id: drive_motor_id + 1,
            drive_inverted: false,
        };

        Self {
            modules: [
                module("front_left", HALF_WHEELBASE, HALF_TRACK_WIDTH, 1),
                module("front_right", HALF_WHEELBASE, -HALF_TRACK_WIDTH, 3),
                module("back_left", -HALF_WHEELBASE, HALF_TRACK_WIDTH, 5),
                module("back_right", -HALF_WHEELBASE, -HALF_TRACK_WIDTH, 7),
            ],
            max_speed: 5.6,
            max_angular_speed: TAU,
            magnitude_slew_rate: 1.8,
            rotational_slew_rate: 2.0,
            wheel_diameter: 0.0762,
            drive_gear_ratio: 4.71,
            steer_gear_ratio: 1.0,
            steer_gains: PidGains::default(),
            drive_current_limit: 50,
            steer_current_limit: 30,
            loop_period: Duration::from_millis(1000 / LOOP_HZ),
            heading_settle: Duration::from_secs(1),
            heading_calibration_timeout: Duration::from_secs(5),
        }
    }
}

impl DriveConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: DriveConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Module offsets in module order
    pub fn offsets(&self) -> [Translation; MODULE_COUNT] {
        self.modules.each_ref().map(|m| m.offset)
    }

    /// Wheel travel per drive motor revolution, meters
    pub fn meters_per_drive_rev(&self) -> f64 {
        std::f64::consts::PI * self.wheel_diameter / self.drive_gear_ratio
    }

    /// Control period in seconds
    pub fn dt(&self) -> f64 {
        self.loop_period.as_secs_f64()
    }

    /// Check every invariant the drive core relies on. The kinematics matrix
    /// rank is checked separately when the kinematics is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("max_speed", self.max_speed)?;
        positive("max_angular_speed", self.max_angular_speed)?;
        positive("magnitude_slew_rate", self.magnitude_slew_rate)?;
        positive("rotational_slew_rate", self.rotational_slew_rate)?;
        positive("wheel_diameter", self.wheel_diameter)?;
        positive("drive_gear_ratio", self.drive_gear_ratio)?;
        positive("steer_gear_ratio", self.steer_gear_ratio)?;
        positive("loop_period", self.dt())?;

        for (field, value) in [
            ("steer_gains.p", self.steer_gains.p),
            ("steer_gains.i", self.steer_gains.i),
            ("steer_gains.d", self.steer_gains.d),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite { field, value });
            }
        }

        if self.heading_calibration_timeout <= self.heading_settle {
            return Err(ConfigError::CalibrationWindow {
                settle: self.heading_settle,
                timeout: self.heading_calibration_timeout,
            });
        }

        for module in &self.modules {
            for (field, value) in [
                ("offset.x", module.offset.x),
                ("offset.y", module.offset.y),
                ("calibration_offset", module.calibration_offset),
            ] {
                if !value.is_finite() {
                    return Err(ConfigError::NotFinite { field, value });
                }
            }
            if module.offset.norm() < 1e-6 {
                return Err(ConfigError::ZeroOffset {
                    name: module.name.clone(),
                });
            }
        }

        for (i, a) in self.modules.iter().enumerate() {
            for b in &self.modules[i + 1..] {
                if a.offset.distance_to(&b.offset) < 1e-6 {
                    return Err(ConfigError::DuplicateOffset {
                        a: a.name.clone(),
                        b: b.name.clone(),
                    });
                }
            }
        }

        let mut ids: Vec<u8> = self
            .modules
            .iter()
            .flat_map(|m| [m.drive_motor_id, m.steer_motor_id])
            .collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::DuplicateMotorId { id: pair[0] });
        }

        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

// Durations are written as integer milliseconds in config files
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
