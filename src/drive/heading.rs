// Heading source: wraps the yaw sensor and exposes a counter-clockwise-positive
// continuous heading, with last-known fallback while the sensor is disconnected.

use tracing::{info, warn};

use super::geometry::wrap_angle;
use crate::hardware::Gyro;

/// One reading of the heading source, shared by everything in a control cycle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeadingSample {
    /// Continuous heading in radians, counter-clockwise positive
    pub angle: f64,
    /// Yaw rate in rad/s, counter-clockwise positive
    pub rate: f64,
    /// False if `angle` is a held value from before the sensor dropped out
    pub connected: bool,
}

pub struct HeadingSource<G> {
    gyro: G,
    last: HeadingSample,
}

impl<G: Gyro> HeadingSource<G> {
    pub fn new(gyro: G) -> Self {
        Self {
            gyro,
            last: HeadingSample::default(),
        }
    }

    /// Read the sensor once. While disconnected the last known heading is
    /// held and the rate reads zero; this is never an error.
    pub fn sample(&mut self) -> HeadingSample {
        let connected = self.gyro.is_connected();

        if connected != self.last.connected {
            if connected {
                info!("Heading sensor connected");
            } else {
                warn!(
                    "Heading sensor disconnected, holding last heading {:.3} rad",
                    self.last.angle
                );
            }
        }

        self.last = if connected {
            HeadingSample {
                angle: -self.gyro.angle(),
                rate: -self.gyro.rate(),
                connected,
            }
        } else {
            HeadingSample {
                angle: self.last.angle,
                rate: 0.0,
                connected,
            }
        };
        self.last
    }

    /// Last sample without touching the sensor
    pub fn last(&self) -> HeadingSample {
        self.last
    }

    /// Heading in degrees, wrapped into (-180, 180]
    pub fn degrees(&self) -> f64 {
        wrap_angle(self.last.angle).to_degrees()
    }

    /// Make the current orientation the zero heading
    pub fn zero(&mut self) {
        self.gyro.reset();
        self.last.angle = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    use crate::sim::SimGyro;

    #[test]
    fn test_converts_to_counter_clockwise() {
        let gyro = SimGyro::new();
        let mut heading = HeadingSource::new(gyro.clone());
        gyro.set_heading(0.5);
        gyro.set_rate(0.1);
        let sample = heading.sample();
        assert_abs_diff_eq!(sample.angle, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(sample.rate, 0.1, epsilon = 1e-12);
        assert!(sample.connected);
        assert_abs_diff_eq!(heading.degrees(), 0.5f64.to_degrees(), epsilon = 1e-9);
    }

    #[test]
    fn test_holds_last_heading_when_disconnected() {
        let gyro = SimGyro::new();
        let mut heading = HeadingSource::new(gyro.clone());
        gyro.set_heading(1.0);
        heading.sample();

        gyro.set_connected(false);
        gyro.set_heading(2.0);
        let sample = heading.sample();
        assert!(!sample.connected);
        assert_abs_diff_eq!(sample.angle, 1.0, epsilon = 1e-12);
        assert_eq!(sample.rate, 0.0);

        gyro.set_connected(true);
        assert_abs_diff_eq!(heading.sample().angle, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_resets_reference() {
        let gyro = SimGyro::new();
        let mut heading = HeadingSource::new(gyro.clone());
        gyro.set_heading(1.0);
        heading.sample();
        heading.zero();
        assert_eq!(heading.last().angle, 0.0);
        assert_abs_diff_eq!(heading.sample().angle, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_degrees_wraps() {
        let gyro = SimGyro::new();
        let mut heading = HeadingSource::new(gyro.clone());
        gyro.set_heading(3.0 * std::f64::consts::PI / 2.0);
        heading.sample();
        assert_abs_diff_eq!(heading.degrees(), -90.0, epsilon = 1e-9);
    }
}
