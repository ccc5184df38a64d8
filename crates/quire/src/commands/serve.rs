//! `quire serve` command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use quire_config::{CliSettings, Config};
use quire_server::{run_server, server_config_from_quire_config};
use quire_site::SiteBuilder;

use super::site_config;
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Path to configuration file (default: auto-discover quire.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on as `host:port` (overrides config).
    #[arg(long)]
    pub host: Option<String>,

    /// Enable verbose output (request and watcher logs).
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the server stops on a
    /// fatal error.
    pub(crate) async fn execute(self, version: &str) -> Result<(), CliError> {
        let output = Output::new();

        let cli_settings = CliSettings { host: self.host };
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;

        let server_config = server_config_from_quire_config(&config);
        let builder = Arc::new(SiteBuilder::new(site_config(&config)));

        output.banner(version);
        if let Some(path) = &config.config_path {
            output.field("config", path.display());
        }
        output.field("content", server_config.content_dir.display());
        output.field("templates", server_config.templates_dir.display());
        output.field("output", server_config.output_dir.display());
        output.success(&format!("Serving on http://{}", server_config.host));
        output.hint("Press Ctrl-C to stop");

        tracing::debug!(config = ?config.config_path, host = %server_config.host, "Starting dev server");
        run_server(server_config, builder).await?;
        Ok(())
    }
}
