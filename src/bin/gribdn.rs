//! GRIB Downloader.
//!
//! Brings the archive up to date with what the remote service publishes, then evicts old data.

use std::{error::Error, process::ExitCode};

use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};

use grib_archive::{
    Archive, ArchiveLocks, CancelFlag, CommonCmdLineArgs, Fetcher, GribArchiveErr, NamingScheme,
    NomadsClient, Reconciler,
};

#[derive(Parser)]
#[command(name = "gribdn")]
#[command(about = "Download ensemble GRIB files into your archive.")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonCmdLineArgs,

    /// Fan out over every published cycle, not just those missing locally, to complete cycles
    /// that were only partially downloaded.
    #[arg(long)]
    refill: bool,
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
    let constants = &config.constants;

    let arch = Archive::open(&constants.root, &constants.db_file)?;
    let naming = NamingScheme::from_config(&config);
    let remote = NomadsClient::new(constants.timeout, constants.retries)?;
    let locks = ArchiveLocks::new();
    let fetcher = Fetcher::new(&arch, &remote, &naming, &locks);

    let cancel = CancelFlag::new();
    cancel.cancel_on_shutdown()?;

    let reconciler = Reconciler::new(
        fetcher,
        constants.max_concurrent_fetches,
        constants.retention_days,
        cancel.clone(),
    );

    let now = Utc::now().naive_utc();

    for profile in cli.common.selected_models(&config)? {
        if cancel.is_cancelled() {
            warn!(model = %profile.name, "cancelled, not updating");
            continue;
        }

        match reconciler.reconcile(profile, now, cli.refill) {
            Ok(report) => {
                for (cycle, err) in &report.failures {
                    warn!(model = %report.model, %cycle, %err, "cycle not completed");
                }
                for err in &report.local_errors {
                    error!(model = %report.model, %err, "archive error during update");
                }

                info!(
                    model = %report.model,
                    published = report.remote_cycles.len(),
                    fetched = report.fetched.len(),
                    failed = report.failures.len(),
                    unresolved = report.unresolved,
                    evicted = report.evicted.len(),
                    "update finished"
                );
            }
            Err(err) => {
                // Local trouble with one model does not stop the others.
                error!(model = %profile.name, %err, "update failed");
            }
        }
    }

    // Models dropped from the configuration still age out.
    match reconciler.sweep_all(now) {
        Ok(evicted) => info!(evicted = evicted.len(), "retention sweep of all models"),
        Err(err) => error!(%err, "retention sweep failed"),
    }

    Ok(())
}
