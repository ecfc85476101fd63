//! Exponential backoff with jitter for calls to the vehicle gateway and
//! the world data file.

use rand::Rng;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    failures: u32,
    next_attempt_at: Instant,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            current: base,
            failures: 0,
            next_attempt_at: Instant::now(),
            jitter_ratio: 0.2,
        }
    }

    /// Whether the cool-down after the last failure has elapsed.
    pub fn ready(&self) -> bool {
        Instant::now() >= self.next_attempt_at
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.failures = 0;
        self.next_attempt_at = Instant::now();
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn fail(&mut self) -> Duration {
        let delay = jittered(self.current, self.jitter_ratio);
        self.failures += 1;
        self.current = self.current.saturating_mul(2).min(self.max);
        self.next_attempt_at = Instant::now() + delay;
        delay
    }
}

fn jittered(delay: Duration, ratio: f64) -> Duration {
    let spread_ms = (delay.as_millis() as f64 * ratio.clamp(0.0, 1.0)) as u64;
    if spread_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=spread_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_waits_about_base() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        assert!(backoff.ready());
        let delay = backoff.fail();
        assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(120));
        assert!(!backoff.ready());
        assert_eq!(backoff.failures(), 1);
    }

    #[test]
    fn delays_double_then_saturate() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(40));
        let delays: Vec<Duration> = (0..4).map(|_| backoff.fail()).collect();
        assert!(delays[1] >= Duration::from_millis(20));
        assert!(delays[3] >= Duration::from_millis(40) && delays[3] <= Duration::from_millis(48));
    }

    #[test]
    fn reset_clears_failures() {
        let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_secs(1));
        backoff.fail();
        backoff.reset();
        assert!(backoff.ready());
        assert_eq!(backoff.failures(), 0);
    }
}
