//! Build error types.

use std::io;
use std::path::{Path, PathBuf};

/// Error returned by the site builder.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("invalid front matter in {}: {reason}", path.display())]
    FrontMatter { path: PathBuf, reason: String },

    #[error("failed to parse front matter in {} as YAML: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("template {name:?}: {source}")]
    Template {
        name: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("{} uses unknown template {name:?}", path.display())]
    MissingTemplate { path: PathBuf, name: String },

    #[error("no content file {}", .0.display())]
    UnknownContent(PathBuf),
}

impl BuildError {
    /// Build a closure mapping an [`io::Error`] to [`BuildError::Io`].
    pub(crate) fn io(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }
}
