mod commands;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;

use enminst::config::Settings;
use enminst::exit::ExitCode;
use enminst::expansion::ExpansionError;
use enminst::{interrupt, logging};

#[derive(Parser)]
#[command(name = "enminst", version, about = "ENM management server toolkit")]
struct Cli {
    /// Settings file (default: /opt/ericsson/enminst/etc/enminst.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also log to the terminal
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move blades from enclosure1 to enclosure2
    Expansion {
        #[command(subcommand)]
        command: ExpansionCommands,
    },

    /// Serve one MCollective request (called by the mco agent shim)
    Agent {
        /// Agent name: enminst, enminst_snapshots or filemanager
        name: String,
    },
}

#[derive(Subcommand)]
enum ExpansionCommands {
    /// Check the SED against LITP and the enclosures, and write the expansion model
    ValidateSed {
        /// Site engineering document
        #[arg(long)]
        sed: PathBuf,

        /// Move this system instead of the even-numbered ones (repeatable)
        #[arg(long = "system")]
        systems: Vec<String>,

        /// Delete an existing expansion model without asking
        #[arg(long)]
        yes: bool,
    },

    /// Record the blades to move and the destination enclosure's current bays
    EnclosureReport {
        #[arg(long)]
        sed: PathBuf,
    },

    /// Freeze, evacuate and power down the blades that move
    ShutdownBlades {
        #[arg(long)]
        sed: PathBuf,

        /// Move blades back from enclosure2 to enclosure1
        #[arg(long)]
        rollback: bool,
    },

    /// Point the LITP bmc items at the new iLO addresses
    UpdateIloIps {
        #[arg(long)]
        sed: PathBuf,
    },

    /// Configure EBIPA, power on and unlock the moved blades
    BootBlades {
        #[arg(long)]
        sed: PathBuf,

        /// Move blades back from enclosure2 to enclosure1
        #[arg(long)]
        rollback: bool,
    },

    /// Remove the runtime files of a finished expansion
    Cleanup {
        #[arg(long)]
        sed: PathBuf,

        /// Also clear the EBIPA entries of the vacated bays in enclosure1
        #[arg(long)]
        clean_src_oa: bool,
    },

    /// Run every remaining stage, resuming where the last run stopped
    Run {
        #[arg(long)]
        sed: PathBuf,

        /// Move this system instead of the even-numbered ones (repeatable)
        #[arg(long = "system")]
        systems: Vec<String>,

        /// The blades have been moved into the destination enclosure
        #[arg(long)]
        blades_reseated: bool,

        /// Move blades back from enclosure2 to enclosure1
        #[arg(long)]
        rollback: bool,

        /// Delete an existing expansion model without asking
        #[arg(long)]
        yes: bool,
    },

    /// Show the expansion model and which stages have completed
    Status {
        /// Output format (table, yaml or json)
        #[arg(long, default_value = "table")]
        format: String,
    },
}

fn main() {
    let cli = Cli::parse();
    interrupt::install();
    std::process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => return fail(&e, None),
    };
    if let Err(e) = logging::init(&settings.log_level, &settings.log_file, cli.verbose) {
        // An agent must still answer its request.
        if !matches!(cli.command, Commands::Agent { .. }) {
            return fail(&e, None);
        }
    }

    let result = match cli.command {
        Commands::Agent { name } => {
            return match commands::agent::run(&name) {
                Ok(code) => code.code(),
                Err(e) => {
                    eprintln!("{} {e:#}", "!!".red().bold());
                    ExitCode::InvalidUsage.code()
                }
            };
        }
        Commands::Expansion { command } => expansion(&settings, command),
    };

    match result {
        Ok(()) => ExitCode::Ok.code(),
        Err(e) => fail(&e, Some(settings.log_file.as_path())),
    }
}

fn expansion(settings: &Settings, command: ExpansionCommands) -> anyhow::Result<()> {
    use commands::expansion as step;

    match command {
        ExpansionCommands::ValidateSed { sed, systems, yes } => step::validate_sed(settings, &sed, systems, yes),
        ExpansionCommands::EnclosureReport { sed } => step::enclosure_report(settings, &sed),
        ExpansionCommands::ShutdownBlades { sed, rollback } => step::shutdown_blades(settings, &sed, rollback),
        ExpansionCommands::UpdateIloIps { sed } => step::update_ilo_ips(settings, &sed),
        ExpansionCommands::BootBlades { sed, rollback } => step::boot_blades(settings, &sed, rollback),
        ExpansionCommands::Cleanup { sed, clean_src_oa } => step::cleanup(settings, &sed, clean_src_oa),
        ExpansionCommands::Run {
            sed,
            systems,
            blades_reseated,
            rollback,
            yes,
        } => step::run(settings, &sed, systems, blades_reseated, rollback, yes),
        ExpansionCommands::Status { format } => step::status(settings, &format),
    }
}

/// Print one line for the operator and pick the exit code. Detail goes
/// to the log file.
fn fail(err: &anyhow::Error, log_file: Option<&Path>) -> i32 {
    tracing::error!(error = %format!("{err:#}"), "command failed");
    let (code, message) = match err.downcast_ref::<ExpansionError>() {
        Some(e) => (e.exit_code(), e.to_string()),
        None => (ExitCode::Error, format!("{err:#}")),
    };
    eprintln!("{} {message}", "!!".red().bold());
    if let Some(log) = log_file.filter(|_| code != ExitCode::Interrupted) {
        eprintln!("   see {} for details", log.display());
    }
    code.code()
}
