// Input shaping: per-axis slew-rate limiting of commanded inputs.
// Bounds how fast the commanded magnitude can change between cycles so
// that full-power reversals do not tip the base over.

/// Rate limiter for one input axis, advanced once per control cycle
#[derive(Debug, Clone)]
pub struct SlewRateLimiter {
    /// Maximum change per control cycle (rate * dt)
    max_step: f64,
    value: f64,
}

impl SlewRateLimiter {
    /// * `rate` - Maximum change per second (units of the input)
    /// * `dt` - Control period in seconds
    pub fn new(rate: f64, dt: f64) -> Self {
        Self {
            max_step: rate.abs() * dt.abs(),
            value: 0.0,
        }
    }

    /// Move one cycle's worth toward `target`. Never overshoots `target`
    /// and never moves further than `rate * dt`.
    pub fn calculate(&mut self, target: f64) -> f64 {
        if !target.is_finite() {
            return self.value;
        }
        let step = (target - self.value).clamp(-self.max_step, self.max_step);
        self.value += step;
        self.value
    }

    /// Jump straight to `value`, e.g. after a stop
    pub fn reset(&mut self, value: f64) {
        self.value = value;
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// The three shaped axes of a drive command
#[derive(Debug, Clone)]
pub struct InputShaper {
    pub x: SlewRateLimiter,
    pub y: SlewRateLimiter,
    pub rot: SlewRateLimiter,
}

impl InputShaper {
    pub fn new(magnitude_rate: f64, rotational_rate: f64, dt: f64) -> Self {
        Self {
            x: SlewRateLimiter::new(magnitude_rate, dt),
            y: SlewRateLimiter::new(magnitude_rate, dt),
            rot: SlewRateLimiter::new(rotational_rate, dt),
        }
    }

    /// Shape a normalized (x, y, rot) command
    pub fn shape(&mut self, x: f64, y: f64, rot: f64) -> (f64, f64, f64) {
        (
            self.x.calculate(x),
            self.y.calculate(y),
            self.rot.calculate(rot),
        )
    }

    pub fn reset(&mut self) {
        self.x.reset(0.0);
        self.y.reset(0.0);
        self.rot.reset(0.0);
    }
}
