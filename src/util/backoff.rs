//! Exponential reconnect backoff with uniform jitter.
//!
//! Delays double per attempt from `base` up to `cap`, then a jitter factor in
//! `[1 - j, 1 + j]` is applied so three reconnecting feeds never hammer a
//! venue in lockstep. `reset()` is called after every successful connect.

use std::time::Duration;

use rand::Rng;

pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
    attempt: u32,
}

impl Default for Backoff {
    /// Base 1s, cap 30s, jitter ±20%.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 0.2)
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap,
            jitter,
            attempt: 0,
        }
    }

    /// Delay before the next reconnect attempt.
    pub fn next(&mut self) -> Duration {
        let shift = self.attempt.min(30);
        let mut delay = self.base.saturating_mul(1u32 << shift);
        if delay > self.cap {
            delay = self.cap;
        }

        if self.jitter > 0.0 {
            let factor = 1.0 + (rand::thread_rng().gen::<f64>() * 2.0 - 1.0) * self.jitter;
            delay = Duration::from_secs_f64(delay.as_secs_f64() * factor);
        }

        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
