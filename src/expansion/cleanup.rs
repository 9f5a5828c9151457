//! Tidying up after a completed move: the vacated bays in the source
//! enclosure and the runtime files on the management server.

use std::path::Path;

use colored::Colorize;
use tracing::{info, warn};

use super::blade::UNKNOWN;
use super::context::ExpansionContext;
use super::error::ExpansionError;
use super::model::{ExpansionModel, ModelStore};
use super::progress::ProgressStore;
use super::report;

/// Clear the EBIPA entries of the bays the blades left. Returns the bays
/// cleared.
pub fn cleanup_source(ctx: &ExpansionContext<'_>, model: &ExpansionModel) -> Result<Vec<u32>, ExpansionError> {
    let source = ctx.source();
    let bays: Vec<u32> = model.blades().filter_map(|b| b.src_bay.number()).collect();
    if bays.is_empty() {
        info!(step = "cleanup-source", enclosure = source.enclosure(), "no source bays recorded");
        return Ok(bays);
    }

    for bay in &bays {
        source.clear_ebipa(*bay)?;
        info!(step = "cleanup-source", enclosure = source.enclosure(), bay, "EBIPA entry cleared");
    }
    source.save_ebipa()?;
    println!(
        "{} cleared EBIPA for bays {:?} in {}",
        "ok".green().bold(),
        bays,
        source.enclosure()
    );
    Ok(bays)
}

/// Print what moved, flush stale ARP entries and delete the runtime files.
pub fn finalize(
    ctx: &ExpansionContext<'_>,
    model: &ExpansionModel,
    models: &ModelStore,
    progress: &ProgressStore,
    report_path: &Path,
) -> Result<(), ExpansionError> {
    println!("{} expansion summary", "::".blue().bold());
    for blade in model.blades() {
        println!(
            "   {} ({}) {} bay {} -> {} bay {}",
            blade.system,
            blade.serial,
            blade.src_ilo,
            blade.src_bay,
            blade.dest_ilo,
            blade.dest_bay
        );
    }

    for blade in model.blades() {
        for address in [&blade.src_ilo, &blade.dest_ilo] {
            if address == UNKNOWN {
                continue;
            }
            match ctx.host.clear_arp(address) {
                Ok(()) => info!(step = "arp", address = %address, "ARP entry cleared"),
                Err(e) => warn!(step = "arp", address = %address, error = %e, "ARP entry not cleared"),
            }
        }
    }

    let removed = report::remove(report_path, ctx.host)?;
    info!(step = "report", path = %report_path.display(), removed, "enclosure report removed");
    let removed = models.remove()?;
    info!(step = "model", path = %models.path().display(), removed, "expansion model removed");
    let removed = progress.remove()?;
    info!(step = "progress", path = %progress.path().display(), removed, "progress file removed");

    println!("{} expansion cleanup complete", "ok".green().bold());
    Ok(())
}
