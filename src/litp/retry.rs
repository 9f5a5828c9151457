use std::time::Duration;

use tracing::warn;

use super::error::{ErrorKind, LitpError};
use crate::clock::Clock;

/// Retry policy for idempotent LITP calls: reads and plan polls.
///
/// `max_attempts` counts the first call, so a policy with `max_attempts = 4`
/// retries at most three times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub which_errors: Vec<ErrorKind>,
    /// Model errors are retried when one of their messages mentions any of
    /// these strings.
    pub which_messages: Vec<String>,
}

impl RetryPolicy {
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            which_errors: Vec::new(),
            which_messages: Vec::new(),
        }
    }

    pub fn reads(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            which_errors: vec![ErrorKind::Transport],
            which_messages: vec![
                "ServerUnavailableError".to_string(),
                "InternalServerError".to_string(),
            ],
        }
    }

    pub fn should_retry(&self, err: &LitpError) -> bool {
        if self.which_errors.contains(&err.kind()) {
            return true;
        }
        err.messages().iter().any(|m| {
            self.which_messages
                .iter()
                .any(|needle| m.kind.contains(needle.as_str()) || m.message.contains(needle.as_str()))
        })
    }

    pub fn run<T, F>(&self, clock: &dyn Clock, what: &str, mut op: F) -> Result<T, LitpError>
    where
        F: FnMut() -> Result<T, LitpError>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && self.should_retry(&err) => {
                    warn!(
                        what,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "LITP call failed, retrying"
                    );
                    clock.sleep(self.delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::litp::LitpMessage;

    fn transport() -> LitpError {
        LitpError::Transport {
            path: "/plans/plan".to_string(),
            reason: "connection refused".to_string(),
        }
    }

    #[test]
    fn retries_transport_errors_up_to_the_bound() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::reads(4, Duration::from_secs(5));
        let mut calls = 0;

        let result: Result<(), _> = policy.run(&clock, "get", || {
            calls += 1;
            Err(transport())
        });

        assert!(matches!(result, Err(LitpError::Transport { .. })));
        assert_eq!(calls, 4);
        assert_eq!(clock.sleeps(), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(15));
    }

    #[test]
    fn not_found_is_never_retried() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::reads(4, Duration::from_secs(5));
        let mut calls = 0;

        let result: Result<(), _> = policy.run(&clock, "get", || {
            calls += 1;
            Err(LitpError::NotFound {
                path: "/x".to_string(),
            })
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn model_errors_retry_on_listed_messages_only() {
        let policy = RetryPolicy::reads(2, Duration::ZERO);
        let busy = LitpError::Model {
            method: "GET".to_string(),
            path: "/".to_string(),
            status: 503,
            messages: vec![LitpMessage {
                kind: "ServerUnavailableError".to_string(),
                message: "LITP is in maintenance mode".to_string(),
            }],
        };
        let invalid = LitpError::Model {
            method: "GET".to_string(),
            path: "/".to_string(),
            status: 422,
            messages: vec![LitpMessage {
                kind: "ValidationError".to_string(),
                message: "bad".to_string(),
            }],
        };

        assert!(policy.should_retry(&busy));
        assert!(!policy.should_retry(&invalid));
    }

    #[test]
    fn recovers_after_transient_failure() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::reads(3, Duration::from_secs(1));
        let mut calls = 0;

        let value = policy
            .run(&clock, "get", || {
                calls += 1;
                if calls < 2 {
                    Err(transport())
                } else {
                    Ok("done")
                }
            })
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(clock.sleeps(), 1);
    }
}
