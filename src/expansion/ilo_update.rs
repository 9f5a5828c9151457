//! Pointing each moving system's `bmc` item at its new iLO address.
//!
//! An applied `bmc` item cannot simply be edited: it has to be removed,
//! the removal applied by a plan, and then the item created again with the
//! new address. Rerunning after a partial failure picks up wherever the
//! model was left.

use tracing::info;

use super::blade::Blade;
use super::context::ExpansionContext;
use super::error::ExpansionError;
use super::inventory;
use crate::litp::{self, ItemState, PlanRun};

const PLAN: &str = "plan";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IloUpdate {
    /// Systems whose `bmc` item was (re)created.
    pub created: Vec<String>,
    /// Systems already pointing at the new address.
    pub unchanged: Vec<String>,
    pub plan: Option<PlanRun>,
}

pub fn update_ilo_ips<'b>(
    ctx: &ExpansionContext<'_>,
    blades: impl IntoIterator<Item = &'b Blade>,
) -> Result<IloUpdate, ExpansionError> {
    let mut summary = IloUpdate::default();
    let mut scheduled: Vec<&Blade> = Vec::new();
    let mut plan_required = false;

    for blade in blades {
        match inventory::read_bmc(ctx.litp, &blade.system)? {
            None => {
                info!(system = %blade.system, "no bmc item, will create");
                scheduled.push(blade);
            }
            Some(bmc) if bmc.ipaddress == blade.dest_ilo => {
                info!(system = %blade.system, ilo = %blade.dest_ilo, "bmc already has the new iLO address");
                summary.unchanged.push(blade.system.clone());
            }
            Some(bmc) => {
                if bmc.state != Some(ItemState::Initial) {
                    plan_required = true;
                }
                inventory::delete_bmc(ctx.litp, &blade.system)?;
                info!(system = %blade.system, old = %bmc.ipaddress, state = ?bmc.state, "bmc item removed");
                scheduled.push(blade);
            }
        }
    }

    if plan_required {
        summary.plan = Some(litp::run_plan(ctx.litp, PLAN, ctx.plan_policy(), ctx.clock)?);
    }

    for blade in scheduled {
        let (Some(user), Some(key)) = (blade.ilo_user.as_deref(), blade.ilo_key.as_deref()) else {
            return Err(ExpansionError::validation(format!(
                "{} has no iLO username or password key in the expansion model",
                blade.system
            )));
        };
        inventory::create_bmc(ctx.litp, &blade.system, &blade.dest_ilo, user, key)?;
        info!(system = %blade.system, ilo = %blade.dest_ilo, "bmc item created");
        summary.created.push(blade.system.clone());
    }

    Ok(summary)
}
