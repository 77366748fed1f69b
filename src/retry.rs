use crate::config::BootstrapSettings;
use rand::Rng;
use std::time::Duration;

const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JitterMode {
    #[default]
    None,
    Equal,
    Full,
}

impl JitterMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(JitterMode::None),
            "equal" => Some(JitterMode::Equal),
            "full" => Some(JitterMode::Full),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JitterMode::None => "none",
            JitterMode::Equal => "equal",
            JitterMode::Full => "full",
        }
    }
}

/// Exponential backoff parameters for the startup retry cadence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub ceiling: Duration,
    pub jitter: JitterMode,
}

impl RetryPolicy {
    pub fn from_settings(settings: &BootstrapSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base: settings.backoff_base,
            ceiling: settings.backoff_ceiling,
            jitter: settings.jitter,
        }
    }

    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped at the ceiling.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.ceiling);
        delay.min(self.ceiling)
    }

    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule {
            policy: *self,
            attempts: 0,
        }
    }
}

/// Per-dependency attempt counter. Attempts are strictly sequential: callers
/// `begin_attempt`, record the outcome, then ask `after_failure` for the wait.
#[derive(Clone, Debug)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetrySchedule {
    /// Returns the number of the attempt about to run, or `None` once the budget is spent.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.attempts)
    }

    /// Delay before the next attempt, or `None` when no attempts remain.
    pub fn after_failure(&self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.backoff_for(self.attempts);
        Some(match self.policy.jitter {
            JitterMode::None => delay,
            JitterMode::Equal => jitter_between(delay.mul_f64(0.5), delay),
            JitterMode::Full => jitter_between(Duration::ZERO, delay),
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }
}

pub fn jitter_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let min_secs = min.as_secs_f64();
    let span = max.as_secs_f64() - min_secs;
    let sample = rng.gen::<f64>() * span + min_secs;
    Duration::from_secs_f64(sample)
}

/// `Retry-After` hint for a 503: the re-check interval in whole seconds, at least one.
pub fn retry_after_seconds(interval: Duration) -> u64 {
    let secs = interval.as_secs();
    if interval.subsec_nanos() == 0 {
        secs.max(1)
    } else {
        secs.saturating_add(1).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, base_ms: u64, ceiling_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base: Duration::from_millis(base_ms),
            ceiling: Duration::from_millis(ceiling_ms),
            jitter: JitterMode::None,
        }
    }

    #[test]
    fn backoff_doubles_until_ceiling() {
        let policy = policy(10, 1_000, 5_000);
        let delays: Vec<_> = (1..=5).map(|attempt| policy.backoff_for(attempt)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
    }

    #[test]
    fn schedule_stops_after_max_attempts() {
        let mut schedule = policy(3, 10, 100).schedule();
        assert_eq!(schedule.begin_attempt(), Some(1));
        assert_eq!(schedule.after_failure(), Some(Duration::from_millis(10)));
        assert_eq!(schedule.begin_attempt(), Some(2));
        assert_eq!(schedule.after_failure(), Some(Duration::from_millis(20)));
        assert_eq!(schedule.begin_attempt(), Some(3));
        assert_eq!(schedule.after_failure(), None);
        assert_eq!(schedule.begin_attempt(), None);
        assert!(schedule.exhausted());
    }

    #[test]
    fn huge_attempt_numbers_saturate_at_ceiling() {
        let policy = policy(u32::MAX, 1_000, 30_000);
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn full_jitter_stays_within_bounds() {
        let mut policy = policy(4, 100, 1_000);
        policy.jitter = JitterMode::Full;
        let mut schedule = policy.schedule();
        schedule.begin_attempt();
        schedule.begin_attempt();
        let delay = schedule.after_failure().expect("attempts remain");
        assert!(delay <= Duration::from_millis(200), "delay {delay:?} exceeds backoff");
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_seconds(Duration::from_millis(1_500)), 2);
        assert_eq!(retry_after_seconds(Duration::from_secs(15)), 15);
        assert_eq!(retry_after_seconds(Duration::from_millis(10)), 1);
    }
}
