//! `quire build` command implementation.

use std::path::PathBuf;

use clap::Args;
use quire_config::Config;
use quire_site::{Builder, SiteBuilder};

use super::site_config;
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the build command.
#[derive(Args)]
pub(crate) struct BuildArgs {
    /// Path to configuration file (default: auto-discover quire.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl BuildArgs {
    /// Execute the build command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the build fails.
    pub(crate) fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let config = Config::load(self.config.as_deref(), None)?;
        let builder = SiteBuilder::new(site_config(&config));
        tracing::debug!(config = ?config.config_path, output = %config.dirs.output_dir.display(), "Building site");

        let report = builder.build()?;

        output.success(&format!(
            "Built {} pages ({} files copied) into {} in {:.2?}",
            report.pages,
            report.copied,
            config.dirs.output_dir.display(),
            report.elapsed,
        ));
        Ok(())
    }
}
