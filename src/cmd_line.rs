//! Command line options that are used across applications.

use std::path::PathBuf;

use clap::Args;
use tracing_subscriber::EnvFilter;

use crate::{config::Config, errors::GribArchiveErr, models::ModelProfile};

/// Arguments shared by the command line tools.
#[derive(Args, Clone, Debug)]
pub struct CommonCmdLineArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Path to the archive. Overrides the root in the configuration file.
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Models to use for this operation, case insensitive. Defaults to every configured model.
    #[arg(short, long, num_args = 1..)]
    models: Vec<String>,

    /// Only log warnings and errors.
    #[arg(short, long)]
    quiet: bool,
}

impl CommonCmdLineArgs {
    /// Install the global log subscriber. `RUST_LOG` takes precedence over the default level.
    pub fn init_logging(&self) {
        let default = if self.quiet { "warn" } else { "info" };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    /// Load the configuration file, applying the root override.
    pub fn load_config(&self) -> Result<Config, GribArchiveErr> {
        let config = Config::load(&self.config)?;

        Ok(match &self.root {
            Some(root) => config.with_root(root.clone()),
            None => config,
        })
    }

    /// The profiles of the models selected on the command line, or all configured models.
    pub fn selected_models<'a>(
        &self,
        config: &'a Config,
    ) -> Result<Vec<&'a ModelProfile>, GribArchiveErr> {
        if self.models.is_empty() {
            return Ok(config.models.values().collect());
        }

        self.models
            .iter()
            .map(|name| {
                config
                    .models
                    .values()
                    .find(|profile| profile.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| GribArchiveErr::InvalidModelName(name.clone()))
            })
            .collect()
    }
}
