//! The expansion stage machine.
//!
//! Stages run in order and each one is recorded in the progress file as
//! soon as it completes. A failed or interrupted run leaves the model and
//! progress in place, and the next run starts at the first stage that has
//! not completed. Reseat is the operator's part: the run stops there until
//! it is started again with the blades confirmed as moved.

use std::path::{Path, PathBuf};

use chrono::Local;
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use super::blade::Blade;
use super::boot;
use super::cleanup;
use super::context::ExpansionContext;
use super::drain;
use super::error::ExpansionError;
use super::ilo_update;
use super::model::{ExpansionModel, ModelStore};
use super::progress::{Progress, ProgressStore, Stage};
use super::report;
use super::validate::{self, BayLookup, Confirm, Selection};

pub struct RunOptions<'a> {
    pub selection: Selection,
    pub confirm: &'a dyn Confirm,
    /// The operator has moved the blades into the destination enclosure.
    pub blades_reseated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Stopped before Reseat; rerun with the blades confirmed as moved.
    AwaitingReseat,
}

/// What `expansion status` shows.
#[derive(Debug, Clone, Serialize)]
pub struct PlanStatus {
    pub model_path: PathBuf,
    pub model: Option<ExpansionModel>,
    pub progress: Option<Progress>,
    /// The progress file belongs to a different model.
    pub stale_progress: bool,
    pub next_stage: Option<Stage>,
}

/// Where an expansion stands, from the files alone.
pub fn status(models: &ModelStore, progress: &ProgressStore) -> Result<PlanStatus, ExpansionError> {
    let model = models.load()?;
    let stored = progress.read()?;
    let stale_progress = match (&model, &stored) {
        (Some(model), Some(progress)) => !progress.describes(&model.checksum()?),
        (None, Some(_)) => true,
        _ => false,
    };
    let next_stage = match (&model, &stored) {
        (None, _) => Some(Stage::Validate),
        (Some(_), Some(progress)) if !stale_progress => progress.next_stage(),
        (Some(_), _) => Some(Stage::Drain),
    };
    Ok(PlanStatus {
        model_path: models.path().to_path_buf(),
        model,
        progress: stored,
        stale_progress,
        next_stage,
    })
}

pub struct ExpansionPlan<'a> {
    ctx: &'a ExpansionContext<'a>,
    models: ModelStore,
    progress: ProgressStore,
    report_path: PathBuf,
}

impl<'a> ExpansionPlan<'a> {
    pub fn new(ctx: &'a ExpansionContext<'a>) -> Self {
        Self {
            ctx,
            models: ModelStore::new(ctx.settings.model_path()),
            progress: ProgressStore::new(ctx.settings.progress_path()),
            report_path: ctx.settings.report_path(),
        }
    }

    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    /// Build the blade list, validate it and write the model.
    pub fn validate(&self, selection: &Selection, confirm: &dyn Confirm) -> Result<ExpansionModel, ExpansionError> {
        let blades = validate::build_blades(self.ctx, selection, self.ctx.source(), BayLookup::Source)?;
        let model = validate::validate(self.ctx, &self.models, confirm, blades)?;
        self.progress.remove()?;
        Ok(model)
    }

    /// Write the enclosure report from the model and the destination
    /// enclosure as it is now.
    pub fn generate_report<'b>(&self, blades: impl IntoIterator<Item = &'b Blade>) -> Result<(), ExpansionError> {
        let names = self.ctx.target().server_names_raw()?;
        let contents = report::render(blades, &names, Local::now());
        report::write(&self.report_path, &contents, self.ctx.host)
    }

    /// Shutdown and boot need the report to tell new bays from old ones.
    /// Rollbacks go by serial instead.
    pub fn require_report(&self) -> Result<(), ExpansionError> {
        if self.ctx.rollback || report::report_file_ok(&self.report_path) {
            return Ok(());
        }
        Err(ExpansionError::validation(format!(
            "enclosure report {} is missing or incomplete, run enclosure-report first",
            self.report_path.display()
        )))
    }

    pub fn run(&self, options: &RunOptions<'_>) -> Result<RunOutcome, ExpansionError> {
        let (mut model, mut progress) = self.resume(options)?;

        while let Some(stage) = progress.next_stage() {
            println!("{} stage {stage}", "::".blue().bold());
            info!(stage = %stage, "starting stage");

            let step = self.run_stage(stage, &mut model, &mut progress, options);
            match step.map_err(|e| e.in_stage(stage))? {
                StageResult::Done => {}
                StageResult::AwaitingReseat => {
                    self.progress.save(&mut progress).map_err(|e| e.in_stage(stage))?;
                    println!(
                        "{} move the blades to {}, then rerun with --blades-reseated",
                        "!!".yellow().bold(),
                        self.ctx.target().enclosure()
                    );
                    return Ok(RunOutcome::AwaitingReseat);
                }
                StageResult::Finished => {
                    info!(stage = %stage, "expansion complete");
                    return Ok(RunOutcome::Completed);
                }
            }

            progress.complete(stage);
            self.progress.save(&mut progress).map_err(|e| e.in_stage(stage))?;
            println!("{} {stage}", "ok".green().bold());
        }
        Ok(RunOutcome::Completed)
    }

    /// Load the model and its progress, or run Validate to create them.
    fn resume(&self, options: &RunOptions<'_>) -> Result<(ExpansionModel, Progress), ExpansionError> {
        let stage = Stage::Validate;
        if let Some(model) = self.models.load().map_err(|e| e.in_stage(stage))? {
            let checksum = model.checksum().map_err(|e| e.in_stage(stage))?;
            let mut progress = self.progress.load(&checksum).map_err(|e| e.in_stage(stage))?;
            if !progress.is_done(stage) {
                info!(path = %self.models.path().display(), "using existing expansion model");
                if !self.ctx.rollback && !report::report_file_ok(&self.report_path) {
                    self.generate_report(model.blades()).map_err(|e| e.in_stage(stage))?;
                }
                progress.complete(stage);
                self.progress.save(&mut progress).map_err(|e| e.in_stage(stage))?;
            }
            return Ok((model, progress));
        }

        println!("{} stage {stage}", "::".blue().bold());
        let prepared = self
            .validate(&options.selection, options.confirm)
            .and_then(|model| {
                self.generate_report(model.blades())?;
                let mut progress = Progress::new(model.checksum()?);
                progress.complete(stage);
                self.progress.save(&mut progress)?;
                Ok((model, progress))
            });
        let prepared = prepared.map_err(|e| e.in_stage(stage))?;
        println!("{} {stage}", "ok".green().bold());
        Ok(prepared)
    }

    fn run_stage(
        &self,
        stage: Stage,
        model: &mut ExpansionModel,
        progress: &mut Progress,
        options: &RunOptions<'_>,
    ) -> Result<StageResult, ExpansionError> {
        let ctx = self.ctx;
        match stage {
            Stage::Validate => {}
            Stage::Drain => {
                self.require_report()?;
                drain::drain(ctx, model.blades())?;
            }
            Stage::ReconfigureIlo => {
                let summary = ilo_update::update_ilo_ips(ctx, model.blades())?;
                info!(created = ?summary.created, unchanged = ?summary.unchanged, plan = ?summary.plan, "iLO addresses updated in LITP");
            }
            Stage::Reseat => {
                if !(options.blades_reseated || progress.blades_reseated) {
                    return Ok(StageResult::AwaitingReseat);
                }
                progress.blades_reseated = true;
            }
            Stage::ApplyEbipa => {
                self.require_report()?;
                boot::apply_ebipa(ctx, model, &self.report_path)?;
                self.persist(model, progress)?;
            }
            Stage::PowerOn => {
                if boot::power_on(ctx, model)? {
                    self.persist(model, progress)?;
                }
            }
            Stage::ClusterMembership => boot::cluster_membership(ctx, model)?,
            Stage::CleanupSource => {
                cleanup::cleanup_source(ctx, model)?;
            }
            Stage::Finalize => {
                cleanup::finalize(ctx, model, &self.models, &self.progress, &self.report_path)?;
                return Ok(StageResult::Finished);
            }
        }
        Ok(StageResult::Done)
    }

    /// Save a changed model, keep the progress file tied to it and bring
    /// the report's blade rows up to date. The progress file learns the new
    /// checksum before the model is written.
    fn persist(&self, model: &ExpansionModel, progress: &mut Progress) -> Result<(), ExpansionError> {
        let checksum = model.checksum()?;
        progress.pending_checksum = Some(checksum.clone());
        self.progress.save(progress)?;
        self.models.save(model)?;
        progress.settle(checksum);
        self.progress.save(progress)?;
        if report::report_file_ok(&self.report_path) {
            report::refresh(&self.report_path, model.blades(), self.ctx.host)?;
        }
        Ok(())
    }
}

enum StageResult {
    Done,
    AwaitingReseat,
    Finished,
}
