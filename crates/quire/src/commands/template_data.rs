//! `quire template-data` command implementation.

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Args;
use quire_config::Config;
use quire_site::SiteBuilder;

use super::site_config;
use crate::error::CliError;

/// Arguments for the template-data command.
#[derive(Args)]
pub(crate) struct TemplateDataArgs {
    /// Content file to inspect.
    file: PathBuf,

    /// Path to configuration file (default: auto-discover quire.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl TemplateDataArgs {
    /// Execute the template-data command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails, the file is not part of the
    /// content tree, or the data can't be serialized.
    pub(crate) fn execute(self) -> Result<(), CliError> {
        let config = Config::load(self.config.as_deref(), None)?;
        let source = content_relative(&config.dirs.content_dir, &self.file)?;
        let builder = SiteBuilder::new(site_config(&config));
        tracing::debug!(source = %source.display(), "Collecting template data");

        let data = builder.template_data(&source)?;
        let yaml = serde_yaml::to_string(&data)?;

        let mut stdout = console::Term::stdout();
        stdout.write_all(yaml.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

/// Path of `file` relative to `content_dir`.
fn content_relative(content_dir: &Path, file: &Path) -> Result<PathBuf, CliError> {
    let file = file.canonicalize()?;
    let content_dir = content_dir.canonicalize()?;
    file.strip_prefix(&content_dir)
        .map(Path::to_path_buf)
        .map_err(|_| {
            CliError::Validation(format!(
                "{} is not inside the content directory {}",
                file.display(),
                content_dir.display()
            ))
        })
}
