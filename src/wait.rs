//! Bounded polling.
//!
//! Every wait in the toolkit goes through [`Waiter::until`]: check, and if
//! the condition is not met sleep one poll interval and check again, until
//! the deadline passes. Exceeding the deadline is a typed [`WaitError::Timeout`]
//! carrying the last thing the check saw.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::clock::Clock;
use crate::interrupt;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out after {seconds}s waiting for {what} (last seen: {last})")]
    Timeout {
        what: String,
        seconds: u64,
        last: String,
    },

    #[error("interrupted while waiting for {what}")]
    Interrupted { what: String },
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    /// Not there yet; the string describes what was observed.
    Pending(String),
}

pub struct Waiter<'a> {
    clock: &'a dyn Clock,
    interval: Duration,
}

impl<'a> Waiter<'a> {
    pub fn new(clock: &'a dyn Clock, interval: Duration) -> Self {
        Self { clock, interval }
    }

    pub fn clock(&self) -> &'a dyn Clock {
        self.clock
    }

    /// Poll `check` until it is ready or `timeout` elapses.
    ///
    /// The check always runs at least once, and once more after the final
    /// sleep, so a condition that converges right at the deadline is still
    /// observed.
    pub fn until<T, E, F>(&self, what: &str, timeout: Duration, mut check: F) -> Result<T, E>
    where
        F: FnMut() -> Result<Poll<T>, E>,
        E: From<WaitError>,
    {
        let deadline = self.clock.now() + timeout;
        loop {
            if interrupt::interrupted() {
                return Err(WaitError::Interrupted {
                    what: what.to_string(),
                }
                .into());
            }

            let last = match check()? {
                Poll::Ready(value) => return Ok(value),
                Poll::Pending(observed) => observed,
            };

            let now = self.clock.now();
            if now >= deadline {
                return Err(WaitError::Timeout {
                    what: what.to_string(),
                    seconds: timeout.as_secs(),
                    last,
                }
                .into());
            }

            debug!(what, observed = %last, "condition not met, polling again");
            let remaining = deadline - now;
            self.clock.sleep(self.interval.min(remaining));
        }
    }

    /// Sleep a fixed amount, honouring operator interruption.
    pub fn pause(&self, what: &str, duration: Duration) -> Result<(), WaitError> {
        if duration.is_zero() {
            return Ok(());
        }
        debug!(what, seconds = duration.as_secs(), "pausing");
        self.clock.sleep(duration);
        if interrupt::interrupted() {
            return Err(WaitError::Interrupted {
                what: what.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn returns_as_soon_as_check_is_ready() {
        let clock = ManualClock::new();
        let waiter = Waiter::new(&clock, Duration::from_secs(30));
        let mut calls = 0;

        let value: Result<u32, WaitError> = waiter.until("thing", Duration::from_secs(600), || {
            calls += 1;
            Ok(if calls == 3 {
                Poll::Ready(7)
            } else {
                Poll::Pending(format!("call {calls}"))
            })
        });

        assert_eq!(value, Ok(7));
        assert_eq!(clock.elapsed(), Duration::from_secs(60));
    }

    #[test]
    fn timeout_carries_last_observation() {
        let clock = ManualClock::new();
        let waiter = Waiter::new(&clock, Duration::from_secs(30));

        let err = waiter
            .until::<(), WaitError, _>("serial on bay 5", Duration::from_secs(600), || {
                Ok(Poll::Pending("[Unknown]".to_string()))
            })
            .unwrap_err();

        assert_eq!(
            err,
            WaitError::Timeout {
                what: "serial on bay 5".to_string(),
                seconds: 600,
                last: "[Unknown]".to_string(),
            }
        );
        assert_eq!(clock.elapsed(), Duration::from_secs(600));
        assert_eq!(clock.sleeps(), 20);
    }

    #[test]
    fn last_sleep_is_clamped_to_deadline() {
        let clock = ManualClock::new();
        let waiter = Waiter::new(&clock, Duration::from_secs(30));

        let _ = waiter.until::<(), WaitError, _>("x", Duration::from_secs(45), || {
            Ok(Poll::Pending(String::new()))
        });

        assert_eq!(clock.elapsed(), Duration::from_secs(45));
    }
}
