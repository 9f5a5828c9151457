//! `enminst expansion <step>`: the chassis expansion steps, one at a time
//! or as a resumable run.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;

use enminst::clock::SystemClock;
use enminst::config::Settings;
use enminst::enclosure::{OnboardAdministrator, SshTransport};
use enminst::expansion::{
    self, BayLookup, Blade, Confirm, ExpansionContext, ExpansionError, ExpansionModel,
    ExpansionPlan, LocalHost, Preset, RunOptions, RunOutcome, Sed, Selection, StdinConfirm,
    DESTINATION_ENCLOSURE, SOURCE_ENCLOSURE,
};
use enminst::litp::LitpClient;
use enminst::rpc::caller::RpcCaller;

/// Everything a step talks to, built once per invocation.
struct Session {
    settings: Settings,
    sed: Sed,
    sed_path: PathBuf,
    litp: LitpClient,
    enclosure1: OnboardAdministrator,
    enclosure2: OnboardAdministrator,
    rpc: RpcCaller,
    host: LocalHost,
    clock: SystemClock,
}

impl Session {
    fn open(settings: &Settings, sed_path: &Path) -> Result<Self> {
        let sed = Sed::load(sed_path)?;
        let enclosure = |id: &str| -> Result<OnboardAdministrator> {
            let cfg = sed.enclosure(id)?;
            let transport = SshTransport::new(&cfg.username, &cfg.password, settings.ssh.clone());
            Ok(OnboardAdministrator::new(
                cfg.id,
                cfg.oa_ip1,
                cfg.oa_ip2,
                Box::new(transport),
            ))
        };
        let enclosure1 = enclosure(SOURCE_ENCLOSURE)?;
        let enclosure2 = enclosure(DESTINATION_ENCLOSURE)?;

        Ok(Self {
            litp: LitpClient::from_settings(settings).context("creating LITP client")?,
            rpc: RpcCaller::from_settings(&settings.mco),
            host: LocalHost::new(&settings.hw_comm),
            clock: SystemClock,
            settings: settings.clone(),
            sed_path: sed_path.to_path_buf(),
            sed,
            enclosure1,
            enclosure2,
        })
    }

    fn context(&self, rollback: bool) -> ExpansionContext<'_> {
        ExpansionContext {
            settings: &self.settings,
            sed: &self.sed,
            sed_path: &self.sed_path,
            litp: &self.litp,
            enclosure1: &self.enclosure1,
            enclosure2: &self.enclosure2,
            rpc: &self.rpc,
            host: &self.host,
            clock: &self.clock,
            rollback,
        }
    }
}

fn confirm(yes: bool) -> Box<dyn Confirm> {
    if yes {
        Box::new(Preset(true))
    } else {
        Box::new(StdinConfirm)
    }
}

fn require_model(plan: &ExpansionPlan<'_>) -> Result<ExpansionModel, ExpansionError> {
    plan.models().load()?.ok_or_else(|| {
        ExpansionError::validation(format!(
            "no expansion model at {}, run validate-sed first",
            plan.models().path().display()
        ))
    })
}

fn print_blades<'a>(blades: impl IntoIterator<Item = &'a Blade>) {
    for blade in blades {
        println!(
            "   {:<8} {:<12} {:>15} -> {:<15} bay {} -> {}",
            blade.system, blade.serial, blade.src_ilo, blade.dest_ilo, blade.src_bay, blade.dest_bay
        );
    }
}

pub fn validate_sed(settings: &Settings, sed: &Path, systems: Vec<String>, yes: bool) -> Result<()> {
    let session = Session::open(settings, sed)?;
    let ctx = session.context(false);
    let plan = ExpansionPlan::new(&ctx);

    println!("{} validating {}", "::".blue().bold(), sed.display());
    let model = plan.validate(&Selection::from_systems(systems), confirm(yes).as_ref())?;
    print_blades(model.blades());
    println!(
        "{} expansion model written to {}",
        "ok".green().bold(),
        plan.models().path().display()
    );
    Ok(())
}

pub fn enclosure_report(settings: &Settings, sed: &Path) -> Result<()> {
    let session = Session::open(settings, sed)?;
    let ctx = session.context(false);
    let plan = ExpansionPlan::new(&ctx);

    let model = require_model(&plan)?;
    plan.generate_report(model.blades())?;
    println!(
        "{} enclosure report written to {}",
        "ok".green().bold(),
        plan.report_path().display()
    );
    Ok(())
}

pub fn shutdown_blades(settings: &Settings, sed: &Path, rollback: bool) -> Result<()> {
    let session = Session::open(settings, sed)?;
    let ctx = session.context(rollback);
    let plan = ExpansionPlan::new(&ctx);
    plan.require_report()?;

    let model = match plan.models().load()? {
        Some(model) => model,
        None => ExpansionModel::from_blades(expansion::build_blades(
            &ctx,
            &Selection::EvenNumbered,
            ctx.source(),
            BayLookup::Source,
        )?),
    };
    println!("{} shutting down blades in {}", "::".blue().bold(), ctx.source().enclosure());
    print_blades(model.blades());
    expansion::drain(&ctx, model.blades())?;
    println!("{} blades are down, move them to {}", "ok".green().bold(), ctx.target().enclosure());
    Ok(())
}

pub fn update_ilo_ips(settings: &Settings, sed: &Path) -> Result<()> {
    let session = Session::open(settings, sed)?;
    let ctx = session.context(false);
    let plan = ExpansionPlan::new(&ctx);

    let model = require_model(&plan)?;
    let summary = expansion::update_ilo_ips(&ctx, model.blades())?;
    for system in &summary.unchanged {
        println!("{} {system} already has its new iLO address", "::".blue().bold());
    }
    for system in &summary.created {
        println!("{} {system} iLO address updated in LITP", "ok".green().bold());
    }
    Ok(())
}

pub fn boot_blades(settings: &Settings, sed: &Path, rollback: bool) -> Result<()> {
    let session = Session::open(settings, sed)?;
    let ctx = session.context(rollback);
    let plan = ExpansionPlan::new(&ctx);
    plan.require_report()?;

    let stored = plan.models().load()?;
    let persist = stored.is_some();
    let mut model = match stored {
        Some(model) => model,
        None => ExpansionModel::from_blades(expansion::build_blades(
            &ctx,
            &Selection::EvenNumbered,
            ctx.target(),
            BayLookup::Destination,
        )?),
    };

    println!("{} booting blades in {}", "::".blue().bold(), ctx.target().enclosure());
    expansion::apply_ebipa(&ctx, &mut model, plan.report_path())?;
    expansion::power_on(&ctx, &mut model)?;
    if persist {
        plan.models().save(&model)?;
    }
    print_blades(model.blades());
    expansion::cluster_membership(&ctx, &model)?;
    println!("{} blades are back in their clusters", "ok".green().bold());
    Ok(())
}

pub fn cleanup(settings: &Settings, sed: &Path, clean_src_oa: bool) -> Result<()> {
    let session = Session::open(settings, sed)?;
    let ctx = session.context(false);
    let plan = ExpansionPlan::new(&ctx);

    let model = require_model(&plan)?;
    if clean_src_oa {
        expansion::cleanup_source(&ctx, &model)?;
    }
    expansion::finalize(&ctx, &model, plan.models(), plan.progress(), plan.report_path())?;
    Ok(())
}

pub fn run(
    settings: &Settings,
    sed: &Path,
    systems: Vec<String>,
    blades_reseated: bool,
    rollback: bool,
    yes: bool,
) -> Result<()> {
    let session = Session::open(settings, sed)?;
    let ctx = session.context(rollback);
    let plan = ExpansionPlan::new(&ctx);
    let confirm = confirm(yes);
    let options = RunOptions {
        selection: Selection::from_systems(systems),
        confirm: confirm.as_ref(),
        blades_reseated,
    };

    match plan.run(&options)? {
        RunOutcome::Completed => println!("{} chassis expansion complete", "ok".green().bold()),
        RunOutcome::AwaitingReseat => {}
    }
    Ok(())
}

/// Print the model and progress. Needs no SED and talks to nothing.
pub fn status(settings: &Settings, format: &str) -> Result<()> {
    let models = expansion::ModelStore::new(settings.model_path());
    let progress = expansion::ProgressStore::new(settings.progress_path());

    let status = expansion::status(&models, &progress)?;

    match format {
        "yaml" => print!("{}", serde_yaml::to_string(&status)?),
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        "table" => {
            let Some(model) = &status.model else {
                println!("{} no expansion in progress", "::".blue().bold());
                return Ok(());
            };
            println!("{} {}", "model:".bold(), status.model_path.display());
            print_blades(model.blades());
            if let Some(progress) = &status.progress {
                let done: Vec<&str> = progress.completed.iter().map(|s| s.as_str()).collect();
                println!("{} {}", "completed:".bold(), done.join(", "));
                println!("{} {}", "reseated:".bold(), progress.blades_reseated);
            }
            if status.stale_progress {
                println!("{} progress file does not match the model", "!!".yellow().bold());
            }
            match status.next_stage {
                Some(stage) => println!("{} {stage}", "next:".bold()),
                None => println!("{} all stages complete", "next:".bold()),
            }
        }
        other => bail!("unknown format '{other}' (expected table, yaml or json)"),
    }
    Ok(())
}
