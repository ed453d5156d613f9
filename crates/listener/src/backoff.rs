use std::time::Duration;

/// Exponential delay between idle polls: `min * multiplier^attempt`, clamped
/// to `max`. Activity resets it back to `min`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min: Duration,
    max: Duration,
    multiplier: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            multiplier: 2.0,
            attempt: 0,
        }
    }

    /// Compute the delay for a zero-based `attempt` without changing state.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Capped well below the point where powi could overflow to infinity.
        #[allow(clippy::cast_possible_wrap)]
        let raw = self.min.as_secs_f64() * self.multiplier.powi(attempt.min(64) as i32);
        Duration::from_secs_f64(raw.min(self.max.as_secs_f64()))
    }

    /// Return the next delay and advance.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        if delay < self.max {
            self.attempt += 1;
        }
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
