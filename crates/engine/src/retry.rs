//! Exponential backoff with optional jitter.

use std::time::Duration;

use definition::StepDefinition;
use rand::Rng;

/// Computes the delay before retrying a failed attempt.
///
/// The delay for attempt `n` is `base * 2^(n-1)`, optionally randomized
/// within `base * (1 ± jitter_factor)` to decorrelate retries across
/// concurrent runs.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base_ms: u64,
    jitter: bool,
    jitter_factor: f64,
}

impl BackoffPolicy {
    /// Creates a policy with the given base delay and no jitter.
    pub fn new(base_ms: u64) -> Self {
        Self {
            base_ms,
            jitter: false,
            jitter_factor: 0.0,
        }
    }

    /// Enables jitter with the given factor (clamped to 0.0–1.0).
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = true;
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Derives the policy for a step's forward retries.
    pub fn from_step(step: &StepDefinition) -> Self {
        let policy = Self::new(step.backoff_ms);
        if step.jitter {
            policy.with_jitter(step.jitter_factor)
        } else {
            policy
        }
    }

    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let exp_ms = self.base_ms.saturating_mul(1u64 << shift);
        if !self.jitter || self.jitter_factor == 0.0 {
            return Duration::from_millis(exp_ms);
        }
        let spread = rand::thread_rng()
            .gen_range((1.0 - self.jitter_factor)..=(1.0 + self.jitter_factor));
        Duration::from_secs_f64(exp_ms as f64 / 1000.0 * spread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = BackoffPolicy::new(100);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn jittered_delay_stays_within_band() {
        let policy = BackoffPolicy::new(100).with_jitter(0.25);
        for attempt in 1..=4u32 {
            let base = 100u64 << (attempt - 1);
            let low = Duration::from_secs_f64(base as f64 / 1000.0 * 0.75);
            let high = Duration::from_secs_f64(base as f64 / 1000.0 * 1.25);
            for _ in 0..100 {
                let delay = policy.delay_for_attempt(attempt);
                assert!(delay >= low, "attempt {attempt}: {delay:?} below {low:?}");
                assert!(delay <= high, "attempt {attempt}: {delay:?} above {high:?}");
            }
        }
    }

    #[test]
    fn jitter_factor_is_clamped() {
        let policy = BackoffPolicy::new(100).with_jitter(5.0);
        // A factor above 1.0 would produce negative delays; the clamp keeps
        // every sample non-negative.
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn from_step_honors_jitter_flag() {
        let plain = StepDefinition::builder("a", "act").backoff_ms(50).build();
        let policy = BackoffPolicy::from_step(&plain);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(100));

        let jittered = StepDefinition::builder("a", "act")
            .backoff_ms(50)
            .jitter(0.5)
            .build();
        let policy = BackoffPolicy::from_step(&jittered);
        let delay = policy.delay_for_attempt(1);
        assert!(delay >= Duration::from_millis(25));
        assert!(delay <= Duration::from_millis(75));
    }

    #[test]
    fn large_attempts_do_not_overflow() {
        let policy = BackoffPolicy::new(u64::MAX / 2);
        let delay = policy.delay_for_attempt(64);
        assert!(delay >= Duration::from_millis(u64::MAX / 2));
    }
}
