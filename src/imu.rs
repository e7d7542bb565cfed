// Gyro fed from heading samples published on the bus by a separate IMU node

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::IMU_TIMEOUT;
use crate::hardware::Gyro;
use crate::messages::ImuSample;

#[derive(Debug, Default)]
struct Latest {
    sample: ImuSample,
    received_at: Option<Instant>,
    /// Yaw that reads as zero
    reference: f64,
}

/// Latest IMU sample, shared between the subscriber side (`feed`) and the
/// drive (`Gyro`). Disconnected once samples stop arriving.
#[derive(Debug, Clone)]
pub struct RemoteGyro {
    latest: Arc<Mutex<Latest>>,
    timeout: Duration,
}

impl Default for RemoteGyro {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteGyro {
    pub fn new() -> Self {
        Self::with_timeout(IMU_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            latest: Arc::default(),
            timeout,
        }
    }

    pub fn feed(&self, sample: ImuSample, received_at: Instant) {
        let mut latest = self.lock();
        latest.sample = sample;
        latest.received_at = Some(received_at);
    }

    fn lock(&self) -> MutexGuard<'_, Latest> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Gyro for RemoteGyro {
    fn angle(&mut self) -> f64 {
        let latest = self.lock();
        latest.sample.yaw - latest.reference
    }

    fn rate(&mut self) -> f64 {
        self.lock().sample.rate
    }

    fn is_connected(&mut self) -> bool {
        self.lock()
            .received_at
            .is_some_and(|at| at.elapsed() <= self.timeout)
    }

    fn reset(&mut self) {
        let mut latest = self.lock();
        latest.reference = latest.sample.yaw;
    }
}
