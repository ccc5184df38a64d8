//! CLI error types.

use quire_config::ConfigError;
use quire_server::ServerError;
use quire_site::BuildError;

/// CLI error type.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Build(#[from] BuildError),

    #[error("{0}")]
    Server(#[from] ServerError),

    #[error("failed to serialize template data: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Validation(String),
}
