//! Chassis expansion: moving blades from one enclosure to another while
//! their clusters stay up.

mod blade;
mod boot;
mod cleanup;
mod context;
mod drain;
mod error;
mod host;
mod ilo_update;
mod inventory;
mod model;
mod plan;
mod progress;
mod report;
mod sed;
mod validate;

pub use blade::{Bay, Blade, UNKNOWN};
pub use boot::{apply_ebipa, cluster_membership, new_blade_bays, power_on};
pub use cleanup::{cleanup_source, finalize};
pub use context::{ExpansionContext, DESTINATION_ENCLOSURE, SOURCE_ENCLOSURE};
pub use drain::drain;
pub use error::ExpansionError;
pub use host::{LocalHost, ManagementHost};
pub use ilo_update::{update_ilo_ips, IloUpdate};
pub use inventory::{bmc_path, cluster_nodes, read_bmc, system_path, Bmc, ClusterNode};
pub use model::{ExpansionModel, ModelStore};
pub use plan::{status, ExpansionPlan, PlanStatus, RunOptions, RunOutcome};
pub use progress::{Progress, ProgressStore, Stage};
pub use report::{original_bays, render as render_report, report_file_ok};
pub use sed::{node_key, EnclosureConfig, NodeEntry, Sed};
pub use validate::{build_blades, validate, BayLookup, Confirm, Preset, Selection, StdinConfirm};
