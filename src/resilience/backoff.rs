//! Backoff schedules.

use std::time::Duration;

use crate::config::schema::BackoffKind;

/// Delay before a retry, as a function of the attempt index only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `unit * 2^attempt`.
    Exponential { unit: Duration },
    /// The same delay every time.
    Constant(Duration),
}

impl Backoff {
    /// `2^attempt` seconds: 1, 2, 4, 8, 16, ...
    pub fn exponential() -> Self {
        Backoff::Exponential {
            unit: Duration::from_secs(1),
        }
    }

    /// `seconds` between every attempt.
    pub fn constant(seconds: u64) -> Self {
        Backoff::Constant(Duration::from_secs(seconds))
    }

    /// Same shape with a different time unit (tests use milliseconds).
    pub fn scaled(self, unit: Duration) -> Self {
        match self {
            Backoff::Exponential { .. } => Backoff::Exponential { unit },
            Backoff::Constant(_) => Backoff::Constant(unit),
        }
    }

    /// Build from configuration.
    pub fn from_config(kind: BackoffKind, seconds: u64) -> Self {
        match kind {
            BackoffKind::Exponential => Backoff::Exponential {
                unit: Duration::from_secs(seconds),
            },
            BackoffKind::Constant => Backoff::constant(seconds),
        }
    }

    /// Delay to wait after attempt `attempt` failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Exponential { unit } => unit.saturating_mul(2u32.saturating_pow(attempt)),
            Backoff::Constant(delay) => *delay,
        }
    }

    /// Sum of the waits `execute` performs over `max_retries` attempts.
    pub fn total_wait(&self, max_retries: u32) -> Duration {
        (0..max_retries.saturating_sub(1))
            .map(|attempt| self.delay(attempt))
            .fold(Duration::ZERO, |total, delay| total.saturating_add(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_schedule() {
        let backoff = Backoff::exponential();
        let delays: Vec<u64> = (0..5).map(|a| backoff.delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn test_constant_schedule() {
        let backoff = Backoff::constant(2);
        assert!((0..10).all(|a| backoff.delay(a) == Duration::from_secs(2)));
    }

    #[test]
    fn test_scaled_keeps_shape() {
        let backoff = Backoff::exponential().scaled(Duration::from_millis(1));
        assert_eq!(backoff.delay(3), Duration::from_millis(8));
        assert_eq!(
            Backoff::constant(5).scaled(Duration::from_millis(2)).delay(7),
            Duration::from_millis(2)
        );
    }

    #[test]
    fn test_large_attempts_saturate() {
        let delay = Backoff::exponential().delay(200);
        assert!(delay >= Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn test_default_finality_budget() {
        // six polls wait 1 + 2 + 4 + 8 + 16 seconds in between
        assert_eq!(Backoff::exponential().total_wait(6), Duration::from_secs(31));
        assert_eq!(
            Backoff::from_config(BackoffKind::Constant, 2).total_wait(10),
            Duration::from_secs(18)
        );
    }
}
