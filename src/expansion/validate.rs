//! Building the blade list and checking it before anything is moved.

use std::collections::BTreeMap;
use std::io::{self, BufRead};

use colored::Colorize;
use tracing::{debug, info, warn};

use super::blade::{Bay, Blade, UNKNOWN};
use super::context::ExpansionContext;
use super::error::ExpansionError;
use super::inventory::{self, ClusterNode};
use super::model::{ExpansionModel, ModelStore};
use crate::enclosure::OnboardAdministrator;

const CONFIRM_YES: &str = "YeS";
const CONFIRM_NO: &str = "no";

/// Asks the operator a yes/no question.
pub trait Confirm {
    fn confirm(&self, question: &str) -> bool;
}

/// Reads the answer from stdin. Only the exact words `YeS` and `no` are
/// accepted; end of input counts as `no`.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, question: &str) -> bool {
        let stdin = io::stdin();
        loop {
            eprint!("{} {question} [{CONFIRM_YES}/{CONFIRM_NO}]: ", "??".yellow().bold());
            let mut answer = String::new();
            match stdin.lock().read_line(&mut answer) {
                Ok(0) | Err(_) => return false,
                Ok(_) => {}
            }
            match answer.trim() {
                CONFIRM_YES => return true,
                CONFIRM_NO => return false,
                _ => eprintln!("Please answer {CONFIRM_YES} or {CONFIRM_NO}"),
            }
        }
    }
}

/// A fixed answer for non-interactive callers.
pub struct Preset(pub bool);

impl Confirm for Preset {
    fn confirm(&self, question: &str) -> bool {
        info!(question, answer = self.0, "answering prompt from the command line");
        self.0
    }
}

/// Which systems move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    /// Even-numbered systems (`db-2`, `svc-4`), which leaves every cluster
    /// with its odd-numbered half in the source enclosure.
    #[default]
    EvenNumbered,
    Systems(Vec<String>),
}

impl Selection {
    pub fn from_systems(systems: Vec<String>) -> Self {
        if systems.is_empty() {
            Selection::EvenNumbered
        } else {
            Selection::Systems(systems)
        }
    }

    fn includes(&self, node: &ClusterNode) -> bool {
        match self {
            Selection::EvenNumbered => node.number().is_some_and(|n| n % 2 == 0),
            Selection::Systems(systems) => systems.iter().any(|s| *s == node.system),
        }
    }
}

/// Which bay a serial found on the enclosure identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayLookup {
    /// The blade is still in this enclosure; its bay is the source bay.
    Source,
    /// The blade has arrived in this enclosure; its bay is the destination.
    Destination,
}

/// Assemble blade records from LITP (hostname, current iLO), the SED
/// (serial, new iLO) and `oa` (bay, found by serial).
pub fn build_blades(
    ctx: &ExpansionContext<'_>,
    selection: &Selection,
    oa: &OnboardAdministrator,
    lookup: BayLookup,
) -> Result<Vec<Blade>, ExpansionError> {
    let nodes: Vec<ClusterNode> = inventory::cluster_nodes(ctx.litp)?
        .into_iter()
        .filter(|n| selection.includes(n))
        .collect();

    if let Selection::Systems(systems) = selection {
        for system in systems {
            if !nodes.iter().any(|n| n.system == *system) {
                return Err(ExpansionError::validation(format!(
                    "{system} is not a node in the LITP model"
                )));
            }
        }
    }

    let serials = oa.bay_serials()?;
    debug!(enclosure = oa.enclosure(), ?serials, "bay serials");

    let mut blades = Vec::with_capacity(nodes.len());
    for node in nodes {
        let entry = ctx.sed.node(&node.system)?;
        let bmc = inventory::read_bmc(ctx.litp, &node.system)?;

        let src_ilo = match (&bmc, ctx.rollback) {
            (_, true) => UNKNOWN.to_string(),
            (Some(bmc), false) => bmc.ipaddress.clone(),
            (None, false) => {
                return Err(ExpansionError::validation(format!(
                    "{} has no iLO (bmc) item in the LITP model",
                    node.system
                )))
            }
        };

        let found = Bay::from(
            serials
                .iter()
                .find(|(_, s)| s.is(&entry.serial))
                .map(|(bay, _)| *bay),
        );
        let (src_bay, dest_bay) = match lookup {
            BayLookup::Source => (found, Bay::Unknown),
            BayLookup::Destination => (Bay::Unknown, found),
        };
        if !found.is_known() {
            info!(system = %node.system, serial = %entry.serial, enclosure = oa.enclosure(), "serial not found in enclosure");
        }

        let blade = Blade {
            system: node.system.clone(),
            hostname: node.hostname.clone(),
            serial: entry.serial.clone(),
            src_ilo,
            dest_ilo: entry.ilo_ip.to_string(),
            src_bay,
            dest_bay,
            ilo_user: bmc.as_ref().and_then(|b| b.username.clone()),
            ilo_key: Some(
                bmc.and_then(|b| b.password_key)
                    .unwrap_or_else(|| entry.ilo_key()),
            ),
        };
        info!(
            system = %blade.system,
            serial = %blade.serial,
            src_ilo = %blade.src_ilo,
            dest_ilo = %blade.dest_ilo,
            src_bay = %blade.src_bay,
            "blade"
        );
        blades.push(blade);
    }

    if blades.is_empty() {
        return Err(ExpansionError::validation("no blades selected to move"));
    }
    Ok(blades)
}

/// Check `blades` and write the expansion model. Nothing is written when
/// any rule fails.
pub fn validate(
    ctx: &ExpansionContext<'_>,
    store: &ModelStore,
    confirm: &dyn Confirm,
    blades: Vec<Blade>,
) -> Result<ExpansionModel, ExpansionError> {
    if !ctx.host.hw_comm_installed() {
        return Err(ExpansionError::validation(
            "hw_comm is not installed, install it before proceeding",
        ));
    }

    if store.exists() {
        warn!(path = %store.path().display(), "expansion model file already exists");
        if !confirm.confirm("Do you want to delete the model file?") {
            return Err(ExpansionError::validation(
                "cannot continue while the expansion model file exists",
            ));
        }
        store.remove()?;
        info!(path = %store.path().display(), "removed expansion model file");
    }

    let moving: Vec<Blade> = blades
        .into_iter()
        .filter(|b| {
            if !b.is_moving() {
                info!(system = %b.system, ilo = %b.dest_ilo, "iLO unchanged, blade does not move");
            }
            b.is_moving()
        })
        .collect();
    if moving.is_empty() {
        return Err(ExpansionError::validation("no blade has a new iLO address in the SED"));
    }

    let mut dest_bays: BTreeMap<u32, &str> = BTreeMap::new();
    for blade in &moving {
        check_blade(ctx, blade)?;

        if let Some(other) = moving.iter().find(|o| o.src_ilo == blade.dest_ilo) {
            return Err(ExpansionError::validation(format!(
                "{} new iLO {} is the current iLO of {}",
                blade.system, blade.dest_ilo, other.system
            )));
        }
        if let Some(bay) = blade.dest_bay.number() {
            if let Some(other) = dest_bays.insert(bay, &blade.system) {
                return Err(ExpansionError::validation(format!(
                    "{} and {} are both destined for bay {bay}",
                    other, blade.system
                )));
            }
        }
        info!(system = %blade.system, serial = %blade.serial, "blade will move to the other enclosure");
    }

    let model = ExpansionModel::from_blades(moving);
    store.save(&model)?;
    Ok(model)
}

fn check_blade(ctx: &ExpansionContext<'_>, blade: &Blade) -> Result<(), ExpansionError> {
    let sed_serial = ctx.sed.node(&blade.system)?.serial;
    if sed_serial != blade.serial {
        return Err(ExpansionError::validation(format!(
            "serial numbers do not match for {}: SED has {sed_serial}, blade has {}",
            blade.system, blade.serial
        )));
    }
    if !blade.src_bay.is_known() && !blade.dest_bay.is_known() {
        return Err(ExpansionError::validation(format!(
            "serial {} of {} is not in {}",
            blade.serial,
            blade.system,
            ctx.source().enclosure()
        )));
    }

    let count = ctx.sed.count_value(&blade.dest_ilo);
    if count > 1 {
        return Err(ExpansionError::validation(format!(
            "duplicate IP {} appears {count} times in the SED",
            blade.dest_ilo
        )));
    }

    // A rollback returns blades to addresses they may still be answering on.
    if !ctx.rollback && ctx.host.ping(&blade.dest_ilo) {
        return Err(ExpansionError::validation(format!(
            "new iLO IP {} of {} is already in use",
            blade.dest_ilo, blade.system
        )));
    }
    Ok(())
}
