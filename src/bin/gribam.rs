//! GRIB Archive Manager

use std::{error::Error, process::ExitCode};

use chrono::Utc;
use clap::{Parser, Subcommand};

use grib_archive::{
    Archive, ArchiveLocks, ArchiveRecord, ArtifactKey, CommonCmdLineArgs, Config, Cycle,
    GribArchiveErr, Member, RetentionSweeper,
};

#[derive(Parser)]
#[command(name = "gribam")]
#[command(about = "Manage an ensemble GRIB file archive.")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonCmdLineArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new archive.
    Create {
        /// Delete any existing archive at the configured root first.
        #[arg(long)]
        force: bool,
    },
    /// List every file in the index, oldest first.
    List {
        /// Only this model.
        #[arg(long)]
        model: Option<String>,
    },
    /// List the models that have data in the archive.
    Models,
    /// List the files of the latest cycle of each model.
    Latest {
        /// Only this model.
        #[arg(long)]
        model: Option<String>,
    },
    /// Show first and last cycles, and gaps, for the selected models.
    Inventory,
    /// Remove a single file from the archive.
    Remove {
        /// Model name.
        model: String,
        /// Cycle, YYYYMMDDHH.
        cycle: Cycle,
        /// Ensemble member: control, -1, or the perturbation number.
        #[arg(allow_hyphen_values = true)]
        member: Member,
        /// Forecast hour.
        fhour: u32,
    },
    /// Delete everything older than the retention window.
    Sweep {
        /// Days to keep, overrides the configuration.
        #[arg(long)]
        days: Option<i64>,
        /// Only this model.
        #[arg(long)]
        model: Option<String>,
    },
    /// Remove index entries whose files are missing and stray temporary files.
    Clean,
}

fn main() -> ExitCode {
    if let Err(ref e) = run() {
        eprintln!("error: {}", e);

        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("caused by: {}", cause);
            source = cause.source();
        }

        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run() -> Result<(), GribArchiveErr> {
    let cli = Cli::parse();
    cli.common.init_logging();

    let config = cli.common.load_config()?;

    match cli.command {
        Command::Create { force } => create(&config, force),
        Command::List { model } => {
            let arch = connect(&config)?;
            print_records(&arch.list_all()?, model.as_deref());
            Ok(())
        }
        Command::Models => {
            for model in connect(&config)?.models()? {
                println!("{}", model);
            }
            Ok(())
        }
        Command::Latest { model } => {
            let arch = connect(&config)?;
            print_records(&arch.latest(model.as_deref())?, None);
            Ok(())
        }
        Command::Inventory => inventory(&cli.common, &config),
        Command::Remove {
            model,
            cycle,
            member,
            fhour,
        } => {
            let profile = config.profile(&model)?;
            let arch = connect(&config)?;
            let key = ArtifactKey::new(&profile.name, cycle, member, fhour);
            arch.remove(&key)?;
            println!("Removed {}", key);
            Ok(())
        }
        Command::Sweep { days, model } => {
            let arch = connect(&config)?;
            let locks = ArchiveLocks::new();
            let days = days.unwrap_or(config.constants.retention_days);
            let sweeper = RetentionSweeper::new(&arch, &locks, days);

            let now = Utc::now().naive_utc();
            let evicted = sweeper.sweep(now, model.as_deref())?;
            println!(
                "Removed {} files older than {}.",
                evicted.len(),
                sweeper.threshold(now)
            );
            Ok(())
        }
        Command::Clean => {
            let arch = connect(&config)?;
            let report = arch.clean()?;
            for key in &report.orphans {
                println!("Removed index entry without a file: {}", key);
            }
            for path in &report.stray_files {
                println!("Removed stray file: {}", path.display());
            }
            Ok(())
        }
    }
}

fn connect(config: &Config) -> Result<Archive, GribArchiveErr> {
    Archive::connect(&config.constants.root, &config.constants.db_file)
}

fn create(config: &Config, force: bool) -> Result<(), GribArchiveErr> {
    let constants = &config.constants;

    // Check if the archive already exists. (try connecting to it)
    let already_exists: bool = connect(config).is_ok();

    if already_exists && force {
        std::fs::remove_file(&constants.db_file)?;
        if constants.root.exists() {
            std::fs::remove_dir_all(&constants.root)?;
        }
    } else if already_exists {
        return Err(GribArchiveErr::Config(
            "archive already exists, must use --force to overwrite".to_owned(),
        ));
    }

    Archive::create(&constants.root, &constants.db_file)?;
    println!("Created archive at {}", constants.root.display());

    Ok(())
}

fn inventory(common: &CommonCmdLineArgs, config: &Config) -> Result<(), GribArchiveErr> {
    let arch = connect(config)?;

    for profile in common.selected_models(config)? {
        let inv = match arch.inventory(profile) {
            Ok(inv) => inv,
            Err(GribArchiveErr::NotInIndex) => {
                println!("\nNo data for {}.", profile.name);
                continue;
            }
            Err(err) => return Err(err),
        };

        println!("\nInventory for {}.", inv.model);
        println!("   start: {}", inv.first);
        println!("     end: {}", inv.last);

        if inv.missing.is_empty() {
            println!("   No missing cycles!");
        } else {
            println!("   Missing:");
            for cycle in &inv.missing {
                println!("      {}", cycle);
            }
        }

        if !inv.incomplete.is_empty() {
            println!(
                "   Incomplete (of {} files per cycle):",
                profile.artifacts_per_cycle()
            );
            for (cycle, count) in &inv.incomplete {
                println!("      {} {:>6}", cycle, count);
            }
        }
    }

    Ok(())
}

fn print_records(records: &[ArchiveRecord], model: Option<&str>) {
    for record in records
        .iter()
        .filter(|r| model.map(|m| r.key.model.eq_ignore_ascii_case(m)).unwrap_or(true))
    {
        println!("{:<40} {}", record.key.to_string(), record.path.display());
    }
}
