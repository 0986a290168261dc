use std::time::Duration;

/// Floor for the reconnect delay; a zero delay would retry in a tight loop.
pub const MIN_DELAY: Duration = Duration::from_millis(10);

/// Exponential reconnect delay: doubles on every failure up to `max`, back to `min`
/// after a successful handshake. The current delay never leaves `[min, max]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    /// A `max` below `min` is raised to `min`. `min` is at least [`MIN_DELAY`].
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(MIN_DELAY);
        let max = max.max(min);
        Self {
            current: min,
            min,
            max,
        }
    }

    /// The delay the next failure will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failed connect or a lost connection.
    ///
    /// Returns the delay to wait now; the following failure waits twice as long.
    pub fn fail(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).clamp(self.min, self.max);
        delay
    }

    /// Record a successful handshake.
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}
