//! Bringing the moved blades up in the destination enclosure: EBIPA
//! addressing, power on, and rejoining the cluster.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use tracing::{debug, info, warn};

use super::blade::{Bay, Blade};
use super::context::ExpansionContext;
use super::error::ExpansionError;
use super::model::ExpansionModel;
use super::report;
use crate::enclosure::{EbipaEntry, OaError, OaNetwork, OnboardAdministrator};
use crate::rpc::vcs::{EnminstAgent, VcsCmdApiAgent};
use crate::wait::{Poll, WaitError, Waiter};

const SED_SERIAL_WARNING: &str = "WARNING: The SED Serial numbers";
const VCS_RUNNING: &str = "RUNNING";
const UNHEALTHY_PATH_STATES: [&str; 3] = ["failed", "faulty", "disabled"];

/// Bays that hold a blade now but were empty when the report was taken,
/// in bay order.
pub fn new_blade_bays(
    oa: &OnboardAdministrator,
    report_path: &Path,
) -> Result<Vec<u32>, ExpansionError> {
    let before = report::original_bays(report_path)?;
    let now: BTreeSet<u32> = oa.bay_serials()?.into_keys().collect();
    let new: Vec<u32> = now.difference(&before).copied().collect();
    debug!(enclosure = oa.enclosure(), ?before, ?now, ?new, "new blade bays");
    Ok(new)
}

/// Give every blade a destination bay: where its serial shows up, or else
/// the next newly populated bay.
fn resolve_dest_bays(
    ctx: &ExpansionContext<'_>,
    model: &mut ExpansionModel,
    report_path: &Path,
) -> Result<(), ExpansionError> {
    let target = ctx.target();
    let serials = target.bay_serials()?;

    let mut taken = BTreeSet::new();
    for blade in model.blades_mut() {
        let found = serials
            .iter()
            .find(|(_, s)| s.is(&blade.serial))
            .map(|(bay, _)| *bay);
        if let Some(bay) = found {
            blade.dest_bay = Bay::Known(bay);
        }
        if let Some(bay) = blade.dest_bay.number() {
            taken.insert(bay);
        }
    }

    let unresolved: Vec<String> = model
        .blades()
        .filter(|b| !b.dest_bay.is_known())
        .map(|b| b.system.clone())
        .collect();
    if unresolved.is_empty() {
        return Ok(());
    }
    if ctx.rollback {
        return Err(ExpansionError::validation(format!(
            "serials of {} not found in {}",
            unresolved.join(", "),
            target.enclosure()
        )));
    }

    let free: Vec<u32> = new_blade_bays(target, report_path)?
        .into_iter()
        .filter(|bay| !taken.contains(bay))
        .collect();
    if free.len() != unresolved.len() {
        return Err(ExpansionError::validation(format!(
            "{} new blades found in {} but {} blades are being moved",
            free.len(),
            target.enclosure(),
            unresolved.len()
        )));
    }
    for (system, bay) in unresolved.iter().zip(free) {
        if let Some(blade) = model.get_mut(system) {
            info!(system = %system, bay, "assigned new bay");
            blade.dest_bay = Bay::Known(bay);
        }
    }
    Ok(())
}

/// Refuse to hand out an iLO address the destination already serves from
/// some other bay.
fn check_ilos_not_configured(
    target: &OnboardAdministrator,
    model: &ExpansionModel,
) -> Result<(), ExpansionError> {
    let served = target.ebipa_servers()?;
    for blade in model.blades() {
        match (served.get(&blade.dest_ilo), blade.dest_bay.number()) {
            (Some(bay), Some(dest)) if *bay == dest => {}
            (Some(bay), _) => {
                return Err(ExpansionError::validation(format!(
                    "iLO {} of {} is already configured on bay {bay} of {}",
                    blade.dest_ilo,
                    blade.system,
                    target.enclosure()
                )))
            }
            (None, _) => {}
        }
    }
    Ok(())
}

fn ebipa_entry(blade: &Blade, network: &OaNetwork, domain: &str) -> Result<EbipaEntry, ExpansionError> {
    let bay = blade.dest_bay.number().ok_or_else(|| {
        ExpansionError::validation(format!("{} has no destination bay", blade.system))
    })?;
    Ok(EbipaEntry {
        bay,
        ip: blade.dest_ilo.clone(),
        netmask: network.netmask.clone(),
        gateway: network.gateway.clone(),
        domain: domain.to_string(),
    })
}

/// Resolve destination bays and address each one by EBIPA. A rollback
/// returns blades to bays that still carry their old EBIPA settings, so
/// only the bays are resolved.
pub fn apply_ebipa(
    ctx: &ExpansionContext<'_>,
    model: &mut ExpansionModel,
    report_path: &Path,
) -> Result<(), ExpansionError> {
    let target = ctx.target();
    resolve_dest_bays(ctx, model, report_path)?;
    if ctx.rollback {
        info!(enclosure = target.enclosure(), "rollback, leaving EBIPA unchanged");
        return Ok(());
    }

    check_ilos_not_configured(target, model)?;
    let network = target.network()?;
    let domain = ctx.sed.domain()?;

    for blade in model.blades() {
        let entry = ebipa_entry(blade, &network, domain)?;
        println!(
            "{} EBIPA bay {} -> {} ({})",
            ">>".blue().bold(),
            entry.bay,
            entry.ip,
            blade.system
        );
        target.set_ebipa(&entry)?;
    }
    target.save_ebipa()?;
    Ok(())
}

/// Point EBIPA at the bays `systems` now occupy. Of the `vacated` bays,
/// only those no other blade in the model holds are cleared.
fn readdress(
    ctx: &ExpansionContext<'_>,
    model: &ExpansionModel,
    systems: &[String],
    vacated: &[u32],
) -> Result<(), ExpansionError> {
    let target = ctx.target();
    let network = target.network()?;
    let domain = ctx.sed.domain()?;
    let held: BTreeSet<u32> = model
        .blades()
        .filter(|b| !systems.contains(&b.system))
        .filter_map(|b| b.dest_bay.number())
        .collect();

    for bay in vacated.iter().filter(|bay| !held.contains(bay)) {
        target.clear_ebipa(*bay)?;
    }
    for blade in model.blades().filter(|b| systems.contains(&b.system)) {
        let entry = ebipa_entry(blade, &network, domain)?;
        println!(
            "{} EBIPA bay {} -> {} ({})",
            ">>".blue().bold(),
            entry.bay,
            entry.ip,
            blade.system
        );
        target.set_ebipa(&entry)?;
    }
    target.save_ebipa()?;
    Ok(())
}

/// Move every blade whose serial now shows up in another bay to that bay.
/// Returns whether any bay changed.
fn correct_bays(ctx: &ExpansionContext<'_>, model: &mut ExpansionModel) -> Result<bool, ExpansionError> {
    let serials = ctx.target().bay_serials()?;
    let mut moved = Vec::new();
    let mut vacated = Vec::new();
    for blade in model.blades_mut() {
        let Some(found) = serials
            .iter()
            .find(|(_, s)| s.is(&blade.serial))
            .map(|(bay, _)| *bay)
        else {
            continue;
        };
        if blade.dest_bay.number() == Some(found) {
            continue;
        }
        warn!(system = %blade.system, expected = %blade.dest_bay, actual = found, "blade found in another bay, remapping");
        vacated.extend(blade.dest_bay.number());
        blade.dest_bay = Bay::Known(found);
        moved.push(blade.system.clone());
    }

    if moved.is_empty() {
        return Ok(false);
    }
    if !ctx.rollback {
        readdress(ctx, model, &moved, &vacated)?;
    }
    Ok(true)
}

/// Power on one blade and wait for its serial. Returns whether the blade
/// turned out to be in a different bay than expected.
fn bring_up(
    ctx: &ExpansionContext<'_>,
    waiter: &Waiter<'_>,
    model: &mut ExpansionModel,
    system: &str,
) -> Result<bool, ExpansionError> {
    let target = ctx.target();
    let timeout = Duration::from_secs(ctx.settings.timeouts.serial);
    let (bay, serial) = match model.get(system) {
        Some(blade) => (blade.dest_bay.number(), blade.serial.clone()),
        None => return Err(ExpansionError::validation(format!("{system} is not in the expansion model"))),
    };
    let bay = bay.ok_or_else(|| ExpansionError::validation(format!("{system} has no destination bay")))?;

    target.power_on(bay)?;
    match target.wait_for_serial(waiter, bay, &serial, timeout) {
        Ok(()) => return Ok(false),
        Err(OaError::Wait(WaitError::Timeout { last, .. })) => {
            warn!(system, bay, observed = %last, "serial did not appear in bay");
        }
        Err(e) => return Err(e.into()),
    }

    if let Some(actual) = target.find_serial(&serial)? {
        if actual != bay {
            warn!(system, expected = bay, actual, "blade found in another bay, remapping");
            if let Some(blade) = model.get_mut(system) {
                blade.dest_bay = Bay::Known(actual);
            }
            if !ctx.rollback {
                readdress(ctx, model, &[system.to_string()], &[bay])?;
            }
            target.power_on(actual)?;
            target.wait_for_serial(waiter, actual, &serial, timeout)?;
            return Ok(true);
        }
    }

    target.reset(bay)?;
    target.wait_for_serial(waiter, bay, &serial, timeout)?;
    Ok(false)
}

/// Every blade's iLO address has to be served from its destination bay.
fn verify_ebipa(target: &OnboardAdministrator, model: &ExpansionModel) -> Result<(), ExpansionError> {
    let served = target.ebipa_servers()?;
    let wrong: Vec<String> = model
        .blades()
        .filter(|b| b.dest_bay.number().is_none() || served.get(&b.dest_ilo).copied() != b.dest_bay.number())
        .map(|b| match served.get(&b.dest_ilo) {
            Some(bay) => format!("{} is served from bay {bay}, not {}", b.dest_ilo, b.dest_bay),
            None => format!("{} is not served (bay {})", b.dest_ilo, b.dest_bay),
        })
        .collect();
    if wrong.is_empty() {
        return Ok(());
    }
    Err(ExpansionError::validation(format!(
        "EBIPA on {} does not match the expansion model: {}",
        target.enclosure(),
        wrong.join("; ")
    )))
}

/// Run one hw_comm step, refusing output that reports SED serials the
/// enclosure does not have.
fn hw_comm(ctx: &ExpansionContext<'_>, component: &str) -> Result<(), ExpansionError> {
    let out = ctx.host.hw_comm(component, ctx.sed_path)?;
    match out.lines().find(|l| l.contains(SED_SERIAL_WARNING)) {
        Some(line) => Err(ExpansionError::validation(format!("hw_comm {component}: {}", line.trim()))),
        None => Ok(()),
    }
}

/// Power on every blade and hand the enclosure over to hw_comm. Returns
/// whether any destination bay changed.
pub fn power_on(ctx: &ExpansionContext<'_>, model: &mut ExpansionModel) -> Result<bool, ExpansionError> {
    let waiter = ctx.waiter();
    let target = ctx.target();
    let sleeps = &ctx.settings.sleeps;

    if !ctx.rollback {
        waiter.pause("iLOs to take their EBIPA addresses", Duration::from_secs(sleeps.post_ilo))?;
    }

    let mut remapped = correct_bays(ctx, model)?;
    let systems: Vec<String> = model.blades().map(|b| b.system.clone()).collect();
    for system in &systems {
        if let Some(blade) = model.get(system) {
            println!("{} powering on {system} in bay {}", ">>".blue().bold(), blade.dest_bay);
        }
        remapped |= bring_up(ctx, &waiter, model, system)?;
        if let Some(blade) = model.get(system) {
            println!("{} {system} is in bay {}", "ok".green().bold(), blade.dest_bay);
        }
    }

    if !ctx.rollback {
        verify_ebipa(target, model)?;
        hw_comm(ctx, "configure_oa")?;
        let bays: Vec<u32> = model.blades().filter_map(|b| b.dest_bay.number()).collect();
        target.wait_for_known_serials(&waiter, &bays, Duration::from_secs(ctx.settings.timeouts.serial))?;
        hw_comm(ctx, "configure_vc")?;
    }

    waiter.pause("blades to boot", Duration::from_secs(sleeps.boot_blade))?;
    Ok(remapped)
}

/// Wait for each node to rejoin the cluster, check its storage paths and
/// unlock it. Unlocks are spaced out so only one node at a time is
/// bringing its service groups online.
pub fn cluster_membership(ctx: &ExpansionContext<'_>, model: &ExpansionModel) -> Result<(), ExpansionError> {
    let waiter = ctx.waiter();
    let timeouts = &ctx.settings.timeouts;
    let enminst = EnminstAgent::new(ctx.rpc);
    let vcs = VcsCmdApiAgent::new(ctx.rpc);

    for blade in model.blades() {
        let what = format!("{} to answer ping", blade.hostname);
        waiter.until(&what, Duration::from_secs(timeouts.ping), || -> Result<_, ExpansionError> {
            Ok(if ctx.host.ping(&blade.hostname) {
                Poll::Ready(())
            } else {
                Poll::Pending("no reply".to_string())
            })
        })?;

        let what = format!("VCS on {} to be {VCS_RUNNING}", blade.hostname);
        waiter.until(&what, Duration::from_secs(timeouts.vcs), || -> Result<_, ExpansionError> {
            let systems = match enminst.hasys_state(&blade.hostname) {
                Ok(systems) => systems,
                Err(e) => return Ok(Poll::Pending(e.to_string())),
            };
            Ok(match systems.iter().find(|s| s.name == blade.hostname) {
                Some(s) if s.states.iter().any(|st| st == VCS_RUNNING) => Poll::Ready(()),
                Some(s) => Poll::Pending(s.states.join("|")),
                None => Poll::Pending("not listed by hasys".to_string()),
            })
        })?;

        check_paths(&enminst, blade)?;
        info!(system = %blade.system, "node is back in the cluster");
    }

    let mut first = true;
    for blade in model.blades() {
        if !first {
            waiter.pause("the previous node's service groups", Duration::from_secs(ctx.settings.sleeps.unlock_next_node))?;
        }
        first = false;
        println!("{} unlocking {}", ">>".blue().bold(), blade.hostname);
        vcs.unlock(&blade.hostname, timeouts.unlock)?;
        println!("{} {} unlocked", "ok".green().bold(), blade.hostname);
    }
    Ok(())
}

fn unhealthy_paths(listing: &str) -> Vec<&str> {
    listing
        .lines()
        .filter(|line| {
            let line = line.to_lowercase();
            UNHEALTHY_PATH_STATES.iter().any(|s| line.contains(s))
        })
        .map(str::trim)
        .collect()
}

fn check_paths(agent: &EnminstAgent<'_>, blade: &Blade) -> Result<(), ExpansionError> {
    let listing = agent.get_redundancy_level(&blade.hostname)?;
    let bad = unhealthy_paths(&listing);
    if bad.is_empty() {
        return Ok(());
    }
    Err(ExpansionError::Unhealthy {
        node: blade.hostname.clone(),
        reason: format!("storage paths not active: {}", bad.join("; ")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPATH: &str = "\
mpatha (3600601600a3038004b9d1f8b1) dm-0 DGC,VRAID
size=100G features='1 queue_if_no_path' hwhandler='1 alua' wp=rw
`-+- policy='round-robin 0' prio=50 status=active
  |- 1:0:0:0 sda 8:0  active ready running
  `- 2:0:0:0 sdb 8:16 active ready running";

    #[test]
    fn active_paths_are_healthy() {
        assert!(unhealthy_paths(MULTIPATH).is_empty());
    }

    #[test]
    fn failed_paths_are_reported() {
        let broken = format!("{MULTIPATH}\n  `- 3:0:0:0 sdc 8:32 failed faulty running");
        assert_eq!(
            unhealthy_paths(&broken),
            vec!["`- 3:0:0:0 sdc 8:32 failed faulty running"]
        );
    }
}
