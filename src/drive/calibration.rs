// Startup heading calibration gate
//
// The heading must be zeroed while the base is still, before world-relative
// driving means anything. Instead of a detached sleep-then-zero task, the
// scheduler polls this gate every cycle: it zeroes the heading once the
// sensor has been connected for the settle time, or falls back to
// vehicle-relative driving if that does not happen before the timeout.

use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    /// Waiting for the sensor to settle
    Pending,
    /// Heading zeroed; world-relative driving allowed
    Ready,
    /// Calibration timed out; world-relative requests run vehicle-relative
    Fallback,
}

/// What the caller has to do after polling the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationAction {
    None,
    /// Zero the heading now; the gate has moved to `Ready`
    ZeroHeading,
}

#[derive(Debug, Clone)]
pub struct HeadingCalibration {
    state: CalibrationState,
    started_at: Instant,
    connected_since: Option<Instant>,
    settle: Duration,
    timeout: Duration,
}

impl HeadingCalibration {
    pub fn new(now: Instant, settle: Duration, timeout: Duration) -> Self {
        Self {
            state: CalibrationState::Pending,
            started_at: now,
            connected_since: None,
            settle,
            timeout,
        }
    }

    /// Advance the gate. Only does work while `Pending`.
    pub fn poll(&mut self, now: Instant, connected: bool) -> CalibrationAction {
        if self.state != CalibrationState::Pending {
            return CalibrationAction::None;
        }

        if !connected {
            self.connected_since = None;
        } else if self.connected_since.is_none() {
            self.connected_since = Some(now);
        }

        if let Some(since) = self.connected_since {
            if now.duration_since(since) >= self.settle {
                info!(
                    "Heading calibrated after {:?}",
                    now.duration_since(self.started_at)
                );
                self.state = CalibrationState::Ready;
                return CalibrationAction::ZeroHeading;
            }
        }

        if now.duration_since(self.started_at) >= self.timeout {
            warn!(
                "Heading calibration did not complete within {:?}, world-relative driving disabled",
                self.timeout
            );
            self.state = CalibrationState::Fallback;
        }

        CalibrationAction::None
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == CalibrationState::Ready
    }

    /// An explicit heading zero counts as a completed calibration
    pub fn mark_ready(&mut self) {
        if self.state != CalibrationState::Ready {
            info!("Heading zeroed manually, world-relative driving enabled");
        }
        self.state = CalibrationState::Ready;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTLE: Duration = Duration::from_secs(1);
    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_ready_after_settle() {
        let start = Instant::now();
        let mut gate = HeadingCalibration::new(start, SETTLE, TIMEOUT);

        assert_eq!(gate.poll(start, true), CalibrationAction::None);
        assert_eq!(
            gate.poll(start + Duration::from_millis(500), true),
            CalibrationAction::None
        );
        assert!(!gate.is_ready());
        assert_eq!(gate.poll(start + SETTLE, true), CalibrationAction::ZeroHeading);
        assert!(gate.is_ready());

        // Zeroing happens exactly once
        assert_eq!(gate.poll(start + 2 * SETTLE, true), CalibrationAction::None);
    }

    #[test]
    fn test_disconnect_restarts_settle() {
        let start = Instant::now();
        let mut gate = HeadingCalibration::new(start, SETTLE, TIMEOUT);

        gate.poll(start, true);
        gate.poll(start + Duration::from_millis(800), false);
        gate.poll(start + Duration::from_millis(900), true);
        assert_eq!(
            gate.poll(start + Duration::from_millis(1500), true),
            CalibrationAction::None
        );
        assert_eq!(
            gate.poll(start + Duration::from_millis(1900), true),
            CalibrationAction::ZeroHeading
        );
    }

    #[test]
    fn test_falls_back_on_timeout() {
        let start = Instant::now();
        let mut gate = HeadingCalibration::new(start, SETTLE, TIMEOUT);

        gate.poll(start + Duration::from_secs(2), false);
        assert_eq!(gate.state(), CalibrationState::Pending);
        gate.poll(start + TIMEOUT, false);
        assert_eq!(gate.state(), CalibrationState::Fallback);

        // A late connection does not re-enable it by itself
        assert_eq!(gate.poll(start + 3 * TIMEOUT, true), CalibrationAction::None);
        assert_eq!(gate.state(), CalibrationState::Fallback);

        gate.mark_ready();
        assert!(gate.is_ready());
    }
}
