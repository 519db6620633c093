//! Exponential backoff for event-stream reconnects.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectPolicy;

/// Exponential backoff state shared by reconnect logic.
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: ReconnectPolicy,
    attempts: u32,
    delay: Duration,
}

impl BackoffState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            attempts: 0,
            delay: policy.initial_delay,
            policy,
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.policy.initial_delay;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Advance to the next attempt, updating the delay for the subsequent attempt.
    ///
    /// Returns the delay to wait *before* performing this attempt.
    pub fn next_delay_and_advance(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let current = self.delay;
        self.attempts += 1;
        self.delay = current
            .mul_f64(self.policy.multiplier)
            .min(self.policy.max_delay);
        Some(self.jittered(current))
    }

    // ±jitter_factor around the delay
    fn jittered(&self, delay: Duration) -> Duration {
        let millis = delay.as_millis() as i64;
        let range = (millis as f64 * self.policy.jitter_factor) as i64;
        if range <= 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(-range..=range);
        Duration::from_millis((millis + jitter).max(0) as u64)
    }
}
