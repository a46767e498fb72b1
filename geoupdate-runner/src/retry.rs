//! Exponential backoff bounded by a wall-clock budget.

use std::time::Duration;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Abandon,
}

/// Retry schedule for one edition.
///
/// `budget` is measured from the edition's first attempt, not per attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub budget: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn with_budget(budget: Duration) -> Self {
        Self {
            budget,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    /// Decide after failed attempt number `attempt` (1-based), `elapsed`
    /// since the first attempt started.
    ///
    /// Abandons when sleeping for the next delay would overrun the budget.
    pub fn decide(&self, attempt: u32, elapsed: Duration) -> RetryDecision {
        let delay = self.delay_for(attempt);
        match elapsed.checked_add(delay) {
            Some(resume_at) if resume_at <= self.budget => RetryDecision::RetryAfter(delay),
            _ => RetryDecision::Abandon,
        }
    }

    /// Backoff after attempt `attempt`: `initial * multiplier^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }
}
