//! LITP deployment model client.
//!
//! [`ModelApi`] is the seam the expansion workflow programs against;
//! [`LitpClient`] implements it over REST. Callers only ever hold
//! [`ModelItem`] snapshots.

mod client;
mod error;
mod item;
mod retry;

use std::time::Duration;

use tracing::{info, warn};

pub use client::{Credentials, LitpClient};
pub use error::{ErrorKind, LitpError, LitpMessage};
pub use item::{child_path, ItemState, ModelItem, PlanState, Properties};
pub use retry::RetryPolicy;

use crate::clock::Clock;
use crate::interrupt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    Created,
    /// The model has no pending changes, so LITP generated no tasks.
    NothingToDo,
}

pub trait ModelApi {
    fn get(&self, path: &str) -> Result<ModelItem, LitpError>;

    fn get_children(&self, path: &str) -> Result<Vec<ModelItem>, LitpError>;

    fn exists(&self, path: &str) -> Result<bool, LitpError> {
        match self.get(path) {
            Ok(_) => Ok(true),
            Err(LitpError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create(
        &self,
        parent: &str,
        id: &str,
        item_type: &str,
        properties: &Properties,
    ) -> Result<ModelItem, LitpError>;

    /// Returns whether anything changed.
    fn update(&self, path: &str, properties: &Properties) -> Result<bool, LitpError>;

    /// Returns whether the item was present.
    fn delete(&self, path: &str) -> Result<bool, LitpError>;

    fn create_plan(&self, name: &str) -> Result<PlanOutcome, LitpError>;

    fn set_plan_state(&self, name: &str, state: PlanState) -> Result<(), LitpError>;

    fn get_plan_state(&self, name: &str) -> Result<PlanState, LitpError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanRun {
    Completed,
    NothingToDo,
}

/// Create plan `name`, start it and poll until it finishes.
pub fn run_plan(
    api: &dyn ModelApi,
    name: &str,
    policy: PlanPolicy,
    clock: &dyn Clock,
) -> Result<PlanRun, LitpError> {
    match api.get_plan_state(name) {
        Ok(state) if state.is_active() => {
            return Err(LitpError::PlanBusy {
                plan: name.to_string(),
                state,
            })
        }
        Ok(_) | Err(LitpError::NotFound { .. }) => {}
        Err(e) => return Err(e),
    }

    if api.create_plan(name)? == PlanOutcome::NothingToDo {
        info!(plan = name, "LITP has nothing to do, skipping plan run");
        return Ok(PlanRun::NothingToDo);
    }

    api.set_plan_state(name, PlanState::Running)?;
    info!(plan = name, "LITP plan started");

    let mut last = PlanState::Running;
    for attempt in 1..=policy.attempts {
        last = api.get_plan_state(name)?;
        match last {
            PlanState::Successful => {
                info!(plan = name, "LITP plan completed");
                return Ok(PlanRun::Completed);
            }
            PlanState::Failed | PlanState::Stopped | PlanState::Invalid => {
                warn!(plan = name, state = %last, "LITP plan did not complete");
                return Err(LitpError::PlanFailed {
                    plan: name.to_string(),
                    state: last,
                });
            }
            _ => {}
        }

        if attempt < policy.attempts {
            clock.sleep(policy.delay);
            if interrupt::interrupted() {
                return Err(LitpError::Interrupted {
                    plan: name.to_string(),
                });
            }
        }
    }

    Err(LitpError::PlanTimeout {
        plan: name.to_string(),
        state: last,
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::clock::ManualClock;

    /// Only the plan endpoints matter for these tests.
    struct PlanOnly {
        outcome: PlanOutcome,
        states: RefCell<VecDeque<PlanState>>,
        calls: RefCell<Vec<String>>,
    }

    impl PlanOnly {
        fn new(outcome: PlanOutcome, states: &[PlanState]) -> Self {
            Self {
                outcome,
                states: RefCell::new(states.iter().copied().collect()),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ModelApi for PlanOnly {
        fn get(&self, path: &str) -> Result<ModelItem, LitpError> {
            Err(LitpError::NotFound {
                path: path.to_string(),
            })
        }
        fn get_children(&self, _path: &str) -> Result<Vec<ModelItem>, LitpError> {
            Ok(Vec::new())
        }
        fn create(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &Properties,
        ) -> Result<ModelItem, LitpError> {
            unreachable!()
        }
        fn update(&self, _: &str, _: &Properties) -> Result<bool, LitpError> {
            unreachable!()
        }
        fn delete(&self, _: &str) -> Result<bool, LitpError> {
            unreachable!()
        }
        fn create_plan(&self, _name: &str) -> Result<PlanOutcome, LitpError> {
            self.calls.borrow_mut().push("create".to_string());
            Ok(self.outcome)
        }
        fn set_plan_state(&self, _name: &str, state: PlanState) -> Result<(), LitpError> {
            self.calls.borrow_mut().push(format!("set {state}"));
            Ok(())
        }
        fn get_plan_state(&self, name: &str) -> Result<PlanState, LitpError> {
            self.states
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| LitpError::NotFound {
                    path: format!("/plans/{name}"),
                })
        }
    }

    const POLICY: PlanPolicy = PlanPolicy {
        attempts: 5,
        delay: Duration::from_secs(30),
    };

    #[test]
    fn runs_until_successful() {
        let api = PlanOnly::new(
            PlanOutcome::Created,
            &[
                PlanState::Successful,
                PlanState::Running,
                PlanState::Running,
                PlanState::Successful,
            ],
        );
        let clock = ManualClock::new();

        assert_eq!(run_plan(&api, "plan", POLICY, &clock).unwrap(), PlanRun::Completed);
        assert_eq!(*api.calls.borrow(), vec!["create", "set running"]);
        assert_eq!(clock.elapsed(), Duration::from_secs(60));
    }

    #[test]
    fn nothing_to_do_is_not_an_error() {
        let api = PlanOnly::new(PlanOutcome::NothingToDo, &[]);
        let clock = ManualClock::new();

        assert_eq!(run_plan(&api, "plan", POLICY, &clock).unwrap(), PlanRun::NothingToDo);
        assert_eq!(*api.calls.borrow(), vec!["create"]);
    }

    #[test]
    fn refuses_to_start_while_another_plan_runs() {
        let api = PlanOnly::new(PlanOutcome::Created, &[PlanState::Running]);
        let clock = ManualClock::new();

        let err = run_plan(&api, "plan", POLICY, &clock).unwrap_err();
        assert!(matches!(err, LitpError::PlanBusy { .. }));
        assert!(api.calls.borrow().is_empty());
    }

    #[test]
    fn failed_plan_is_surfaced() {
        let api = PlanOnly::new(PlanOutcome::Created, &[PlanState::Successful, PlanState::Failed]);
        let clock = ManualClock::new();

        let err = run_plan(&api, "plan", POLICY, &clock).unwrap_err();
        assert!(matches!(
            err,
            LitpError::PlanFailed {
                state: PlanState::Failed,
                ..
            }
        ));
    }

    #[test]
    fn polling_is_bounded() {
        let mut states = vec![PlanState::Initial];
        states.extend(std::iter::repeat(PlanState::Running).take(5));
        let api = PlanOnly::new(PlanOutcome::Created, &states);
        let clock = ManualClock::new();

        let err = run_plan(&api, "plan", POLICY, &clock).unwrap_err();
        assert!(matches!(err, LitpError::PlanTimeout { attempts: 5, .. }));
        assert_eq!(clock.sleeps(), 4);
    }
}
