//! Retry state machine with exponential backoff for page fetches.
//!
//! A fetch moves through [`AttemptState`]:
//!
//! ```text
//! Pending -> Retrying(n) -> ... -> Succeeded | GivenUp
//! ```
//!
//! [`RetryTracker`] owns the state and asks [`RetryPolicy`] for a
//! [`RetryDecision`] after each failure. Nothing here touches the network,
//! so the transitions can be exercised directly in tests.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default maximum attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

/// HTTP statuses that are dropped without retrying.
pub const PERMANENT_STATUSES: &[u16] = &[401, 403, 404, 410];

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Timeouts, 5xx, connection resets.
    Transient,
    /// 401/403/404/410 and other client errors.
    Permanent,
    /// HTTP 429.
    RateLimited,
}

impl FailureType {
    /// Classify an HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => FailureType::RateLimited,
            408 => FailureType::Transient,
            s if PERMANENT_STATUSES.contains(&s) => FailureType::Permanent,
            500..=599 => FailureType::Transient,
            _ => FailureType::Permanent,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then run attempt number `attempt` (1-indexed).
    Retry { delay: Duration, attempt: u32 },
    /// Stop.
    DoNotRetry { reason: String },
}

/// Where a single fetch currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    /// The n-th retry is scheduled (n >= 1).
    Retrying(u32),
    Succeeded { attempts: u32 },
    GivenUp { attempts: u32, reason: String },
}

impl AttemptState {
    /// True once the fetch reached `Succeeded` or `GivenUp`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded { .. } | AttemptState::GivenUp { .. }
        )
    }
}

/// Backoff configuration.
///
/// `delay(n) = min(base_delay * multiplier^(n-1), max_delay) + jitter`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Policy that retries without sleeping. Used by tests and local mirrors.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_jitter: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide whether attempt number `attempt` (1-indexed, just failed) gets a successor.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.backoff(attempt) + self.jitter();
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff without jitter after the given failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = attempt.saturating_sub(1) as f64;
        let delay_ms = base_ms * (self.backoff_multiplier as f64).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    fn jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// Drives one fetch through [`AttemptState`].
#[derive(Debug, Clone)]
pub struct RetryTracker {
    policy: RetryPolicy,
    attempts: u32,
    state: AttemptState,
}

impl RetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            state: AttemptState::Pending,
        }
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Mark the start of an attempt
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_success(&mut self) {
        self.state = AttemptState::Succeeded {
            attempts: self.attempts,
        };
    }

    /// Record a failure and return the policy's decision.
    ///
    /// Moves to `Retrying(n)` or `GivenUp`.
    pub fn record_failure(&mut self, failure_type: FailureType) -> RetryDecision {
        let decision = self.policy.should_retry(failure_type, self.attempts);
        self.state = match &decision {
            RetryDecision::Retry { attempt, .. } => AttemptState::Retrying(attempt - 1),
            RetryDecision::DoNotRetry { reason } => AttemptState::GivenUp {
                attempts: self.attempts,
                reason: reason.clone(),
            },
        };
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        for status in [401, 403, 404, 410, 400] {
            assert_eq!(FailureType::from_status(status), FailureType::Permanent);
        }
        for status in [500, 502, 503, 504, 408] {
            assert_eq!(FailureType::from_status(status), FailureType::Transient);
        }
        assert_eq!(FailureType::from_status(429), FailureType::RateLimited);
    }

    #[test]
    fn test_permanent_gives_up_immediately() {
        let mut tracker = RetryTracker::new(RetryPolicy::immediate(3));
        tracker.begin_attempt();
        let decision = tracker.record_failure(FailureType::Permanent);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
        assert_eq!(
            tracker.state(),
            &AttemptState::GivenUp {
                attempts: 1,
                reason: "permanent failure".to_string()
            }
        );
    }

    #[test]
    fn test_transient_walks_through_retrying_states() {
        let mut tracker = RetryTracker::new(RetryPolicy::immediate(3));
        assert_eq!(tracker.state(), &AttemptState::Pending);

        tracker.begin_attempt();
        tracker.record_failure(FailureType::Transient);
        assert_eq!(tracker.state(), &AttemptState::Retrying(1));

        tracker.begin_attempt();
        tracker.record_failure(FailureType::Transient);
        assert_eq!(tracker.state(), &AttemptState::Retrying(2));

        tracker.begin_attempt();
        let decision = tracker.record_failure(FailureType::Transient);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
        assert!(tracker.state().is_terminal());
    }

    #[test]
    fn test_success_after_retry() {
        let mut tracker = RetryTracker::new(RetryPolicy::immediate(3));
        tracker.begin_attempt();
        tracker.record_failure(FailureType::RateLimited);
        tracker.begin_attempt();
        tracker.record_success();
        assert_eq!(tracker.state(), &AttemptState::Succeeded { attempts: 2 });
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_secs(1),
            Duration::from_secs(4),
            2.0,
        );
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(6), Duration::from_secs(4));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy::default().with_max_jitter(Duration::from_millis(10));
        for _ in 0..20 {
            match policy.should_retry(FailureType::Transient, 1) {
                RetryDecision::Retry { delay, attempt } => {
                    assert_eq!(attempt, 2);
                    assert!(delay >= Duration::from_secs(1));
                    assert!(delay <= Duration::from_millis(1010));
                }
                other => panic!("unexpected decision {other:?}"),
            }
        }
    }
}
