use std::path::Path;
use std::time::Duration;

use super::host::ManagementHost;
use super::sed::Sed;
use crate::clock::Clock;
use crate::config::Settings;
use crate::enclosure::OnboardAdministrator;
use crate::litp::{ModelApi, PlanPolicy};
use crate::rpc::caller::RpcCaller;
use crate::wait::Waiter;

pub const SOURCE_ENCLOSURE: &str = "enclosure1";
pub const DESTINATION_ENCLOSURE: &str = "enclosure2";

/// Everything one expansion step talks to.
///
/// `enclosure1` is the enclosure the blades leave and `enclosure2` the one
/// they join. A rollback moves them back, so the roles swap.
pub struct ExpansionContext<'a> {
    pub settings: &'a Settings,
    pub sed: &'a Sed,
    pub sed_path: &'a Path,
    pub litp: &'a dyn ModelApi,
    pub enclosure1: &'a OnboardAdministrator,
    pub enclosure2: &'a OnboardAdministrator,
    pub rpc: &'a RpcCaller,
    pub host: &'a dyn ManagementHost,
    pub clock: &'a dyn Clock,
    pub rollback: bool,
}

impl<'a> ExpansionContext<'a> {
    pub fn source(&self) -> &'a OnboardAdministrator {
        if self.rollback {
            self.enclosure2
        } else {
            self.enclosure1
        }
    }

    pub fn target(&self) -> &'a OnboardAdministrator {
        if self.rollback {
            self.enclosure1
        } else {
            self.enclosure2
        }
    }

    pub fn waiter(&self) -> Waiter<'a> {
        Waiter::new(self.clock, self.settings.timeouts.poll_interval())
    }

    pub fn plan_policy(&self) -> PlanPolicy {
        PlanPolicy {
            attempts: self.settings.litp.plan_poll_attempts,
            delay: Duration::from_secs(self.settings.litp.plan_poll_delay),
        }
    }
}
