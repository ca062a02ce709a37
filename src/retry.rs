//! Bounded exponential backoff for transient failures.

use std::time::Duration;

/// Errors that may succeed if the same request is simply tried again.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Something that can wait. Real code sleeps the thread; tests record.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Caps exponential growth.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based):
    /// attempt n waits min(base_delay * 2^(n-1), max_delay).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        std::cmp::min(delay, self.max_delay)
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// `op` receives the 1-based attempt number. Only transient errors are
/// retried; the last error is returned once the budget is spent.
pub fn retry_with_backoff<T, E, F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff_for_attempt(attempt);
                log::warn!(
                    "Attempt {attempt}/{max_attempts} failed: {e}. Retrying in {:.1}s",
                    delay.as_secs_f64()
                );
                sleeper.sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug)]
    enum TestError {
        Busy,
        Broken,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Busy)
        }
    }

    #[derive(Default)]
    struct RecordingSleeper(RefCell<Vec<Duration>>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.0.borrow_mut().push(duration);
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let p = policy();
        assert_eq!(p.backoff_for_attempt(0), Duration::ZERO);
        assert_eq!(p.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(p.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(p.backoff_for_attempt(3), Duration::from_millis(250));
        assert_eq!(p.backoff_for_attempt(40), Duration::from_millis(250));
    }

    #[test]
    fn test_three_transient_failures_then_success() {
        let sleeper = RecordingSleeper::default();
        let result = retry_with_backoff(&policy(), &sleeper, |attempt| {
            if attempt <= 3 { Err(TestError::Busy) } else { Ok(attempt) }
        });
        assert_eq!(result.unwrap(), 4);
        assert_eq!(
            *sleeper.0.borrow(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250)
            ]
        );
    }

    #[test]
    fn test_gives_up_after_budget() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff(&policy(), &sleeper, |_| {
            calls += 1;
            Err(TestError::Busy)
        });
        assert!(matches!(result, Err(TestError::Busy)));
        assert_eq!(calls, 4);
        assert_eq!(sleeper.0.borrow().len(), 3);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff(&policy(), &sleeper, |_| {
            calls += 1;
            Err(TestError::Broken)
        });
        assert!(matches!(result, Err(TestError::Broken)));
        assert_eq!(calls, 1);
        assert!(sleeper.0.borrow().is_empty());
    }
}
