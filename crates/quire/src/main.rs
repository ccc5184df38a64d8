//! quire CLI - static site generator with a live reloading dev server.
//!
//! Provides commands for:
//! - `build`: Build the site once
//! - `serve`: Build, serve and rebuild on change
//! - `template-data`: Show what a template sees for one content file

mod commands;
mod error;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{BuildArgs, ServeArgs, TemplateDataArgs};
use error::CliError;
use output::Output;

/// Application version from Cargo.toml.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default log filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "warn,quire=info,quire_server=info,quire_site=info,quire_config=info";

/// quire - static site generator.
#[derive(Parser)]
#[command(name = "quire", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the site into the output directory.
    Build(BuildArgs),
    /// Start the dev server with live reload.
    Serve(ServeArgs),
    /// Print the template data for one content file as YAML.
    TemplateData(TemplateDataArgs),
}

fn main() {
    let cli = Cli::parse();
    let output = Output::new();

    // --verbose enables INFO everywhere, otherwise RUST_LOG or the default
    let verbose = matches!(&cli.command, Commands::Serve(args) if args.verbose);
    let filter = if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Build(args) => args.execute(),
        Commands::Serve(args) => tokio::runtime::Runtime::new()
            .map_err(CliError::from)
            .and_then(|rt| rt.block_on(args.execute(VERSION))),
        Commands::TemplateData(args) => args.execute(),
    };

    if let Err(err) = result {
        output.error(&format!("Error: {err}"));
        std::process::exit(1);
    }
}
