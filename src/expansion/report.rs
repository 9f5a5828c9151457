//! The enclosure report: which blades move where, plus a snapshot of the
//! destination enclosure taken before the move. The snapshot is later
//! used to tell newly inserted blades from ones that were already there.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use super::blade::Blade;
use super::error::ExpansionError;
use super::host::ManagementHost;
use super::model::{remove_if_present, write_atomic};
use crate::enclosure;

pub const DESTINATION_SECTION: &str = "DETAILS OF DESTINATION ENCLOSURE";
const BLADES_SECTION: &str = "DETAILS OF BLADES TO BE MOVED";
const ABSENT: &str = "[Absent]";

const HEADER: &str = "|System Name| |Serial Number| |Src iLO IP Address| |Dst iLO IP Address| \
                      |Src Bay| |Dst Bay| |Host Name|";

pub fn render<'a>(
    blades: impl IntoIterator<Item = &'a Blade>,
    destination_names: &str,
    generated: DateTime<Local>,
) -> String {
    let mut out = format!(
        "Enclosure report generated at {}\n\n",
        generated.format("%d-%B-%Y %H:%M")
    );
    out.push_str(BLADES_SECTION);
    out.push('\n');
    out.push_str(&"=".repeat(BLADES_SECTION.len() + 1));
    out.push_str("\n\n");
    out.push_str(HEADER);
    out.push('\n');
    out.push_str(&"=".repeat(103));
    out.push('\n');

    for blade in blades {
        out.push_str(&format!(
            "{:>8} {:>17} {:>19} {:>20} {:>9} {:>9} {:>16}\n",
            blade.system,
            blade.serial,
            blade.src_ilo,
            blade.dest_ilo,
            blade.src_bay.to_string(),
            blade.dest_bay.to_string(),
            blade.hostname,
        ));
    }

    out.push_str("\n\n");
    out.push_str(DESTINATION_SECTION);
    out.push('\n');
    out.push_str(&"=".repeat(DESTINATION_SECTION.len()));
    out.push('\n');
    out.push_str(destination_names);
    out
}

/// Write the report and make it immutable.
pub fn write(path: &Path, contents: &str, host: &dyn ManagementHost) -> Result<(), ExpansionError> {
    if path.exists() {
        host.set_immutable(path, false)?;
    }
    write_atomic(path, contents)?;
    host.set_immutable(path, true)?;
    info!(path = %path.display(), "enclosure report written:\n{contents}");
    Ok(())
}

/// The report exists, has the destination snapshot, and the snapshot shows
/// at least one empty bay.
pub fn report_file_ok(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let ok = contents.contains(DESTINATION_SECTION) && contents.contains(ABSENT);
            if !ok {
                warn!(path = %path.display(), "enclosure report is missing required information");
            }
            ok
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "enclosure report is not readable");
            false
        }
    }
}

/// The raw `SHOW SERVER NAMES` text recorded under the destination section.
fn snapshot(path: &Path, contents: &str) -> Result<String, ExpansionError> {
    let rest = contents
        .split_once(DESTINATION_SECTION)
        .map(|(_, rest)| rest.trim_start_matches('\n'))
        .ok_or_else(|| {
            ExpansionError::validation(format!(
                "{} has no {DESTINATION_SECTION} section",
                path.display()
            ))
        })?;
    Ok(match rest.split_once('\n') {
        Some((rule, names)) if rule.starts_with('=') => names.to_string(),
        _ => rest.to_string(),
    })
}

/// Bays that were populated in the destination enclosure when the report
/// was generated.
pub fn original_bays(path: &Path) -> Result<BTreeSet<u32>, ExpansionError> {
    let contents = fs::read_to_string(path).map_err(|e| ExpansionError::io(path, e))?;
    Ok(enclosure::bay_serials(&snapshot(path, &contents)?)?.into_keys().collect())
}

/// Rewrite the blade rows with what is known now, keeping the snapshot
/// of the destination enclosure from before the move.
pub fn refresh<'a>(
    path: &Path,
    blades: impl IntoIterator<Item = &'a Blade>,
    host: &dyn ManagementHost,
) -> Result<(), ExpansionError> {
    let contents = fs::read_to_string(path).map_err(|e| ExpansionError::io(path, e))?;
    let names = snapshot(path, &contents)?;
    write(path, &render(blades, &names, Local::now()), host)
}

pub fn remove(path: &Path, host: &dyn ManagementHost) -> Result<bool, ExpansionError> {
    if !path.exists() {
        return Ok(false);
    }
    host.set_immutable(path, false)?;
    remove_if_present(path)
}
