//! `quire.toml` loading.
//!
//! A config file is looked up in the working directory and then in each
//! parent. Every setting has a default, so a site without a config file
//! works as long as it uses the standard `content/`, `templates/`,
//! `output/` and `static/` layout next to where quire is started.
//!
//! ```toml
//! [paths]
//! content = "pages"
//! output = "${QUIRE_OUT:-public}"
//!
//! [server]
//! host = "localhost:9023"
//!
//! [live_reload]
//! debounce_ms = 100
//! delivery = "blocking"      # or "best-effort"
//! build_policy = "serialize" # or "shed"
//! on_build_error = "continue" # or "stop"
//! ```
//!
//! `server.host` and the `[paths]` entries may reference environment
//! variables as `${VAR}` (must be set) or `${VAR:-fallback}`.
//!
//! Command line flags are layered on top through [`CliSettings`].

mod expand;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const FILE_NAME: &str = "quire.toml";

const MAX_DEBOUNCE_MS: u64 = 10_000;

/// Values given on the command line. `None` keeps the file's value.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// `--host`.
    pub host: Option<String>,
}

/// Loaded site configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    paths: RawPaths,
    pub server: ServerConfig,
    pub live_reload: LiveReloadConfig,

    /// Absolute (or cwd-relative) site directories.
    #[serde(skip)]
    pub dirs: SiteDirs,
    /// The file this config came from, if any.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::rooted_at(Path::new("."))
    }
}

/// `[paths]` as written, before env expansion and resolution.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawPaths {
    content: Option<String>,
    templates: Option<String>,
    output: Option<String>,
    #[serde(rename = "static")]
    static_dir: Option<String>,
}

/// Site directories after resolution against the config file location.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SiteDirs {
    /// Markdown content tree.
    pub content_dir: PathBuf,
    /// Template set (`*.html` files, non-recursive).
    pub templates_dir: PathBuf,
    /// Generated site, wiped on every build.
    pub output_dir: PathBuf,
    /// Static assets copied to `<output>/static`.
    pub static_dir: PathBuf,
}

/// `[server]`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub host: String,
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost:9023".to_owned(),
            shutdown_grace_ms: 5000,
        }
    }
}

impl ServerConfig {
    /// How long in-flight responses get once shutdown starts.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// How a reload signal reaches each registered client.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Wait for each client to accept the signal (bounded by the delivery timeout).
    #[default]
    Blocking,
    /// Drop the signal for clients that still hold an undelivered one.
    BestEffort,
}

/// What happens to a rebuild request while another build is running.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BuildPolicy {
    /// Wait for the running build, then build again.
    #[default]
    Serialize,
    /// Skip the request; the running build covers it.
    Shed,
}

/// What the dev server does after a failed rebuild.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BuildErrorPolicy {
    /// Log the failure and keep serving the previous output.
    #[default]
    Continue,
    /// Stop the dev server.
    Stop,
}

/// `[live_reload]`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LiveReloadConfig {
    /// Quiet period after the first change event before rebuilding.
    pub debounce_ms: u64,
    pub delivery: DeliveryMode,
    /// Per-client bound in blocking mode. 0 waits forever.
    pub delivery_timeout_ms: u64,
    pub build_policy: BuildPolicy,
    pub on_build_error: BuildErrorPolicy,
}

impl Default for LiveReloadConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            delivery: DeliveryMode::Blocking,
            delivery_timeout_ms: 5000,
            build_policy: BuildPolicy::Serialize,
            on_build_error: BuildErrorPolicy::Continue,
        }
    }
}

impl LiveReloadConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// `None` when delivery may wait forever.
    #[must_use]
    pub fn delivery_timeout(&self) -> Option<Duration> {
        (self.delivery_timeout_ms > 0).then(|| Duration::from_millis(self.delivery_timeout_ms))
    }
}

/// Failure to produce a usable [`Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid quire.toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Validation(String),

    #[error("cannot expand {field}: {message}")]
    EnvVar {
        /// Dotted key, e.g. `server.host`.
        field: String,
        message: String,
    },
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

/// `host:port` with a non-empty host and a numeric port.
fn check_host_port(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(invalid(format!("{field} is empty")));
    }
    match value.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(invalid(format!("{field} must be in host:port format, got {value:?}"))),
    }
}

impl Config {
    /// Read `config_path`, or the nearest `quire.toml`, or fall back to
    /// defaults rooted at the working directory. `cli` is applied last and
    /// the result re-validated.
    ///
    /// # Errors
    ///
    /// Fails when an explicit `config_path` is missing, the file can't be
    /// read or parsed, an env reference can't be expanded, or a value is out
    /// of range.
    pub fn load(config_path: Option<&Path>, cli: Option<&CliSettings>) -> Result<Self, ConfigError> {
        let file = match config_path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => find_upwards(FILE_NAME),
        };
        let mut config = match file {
            Some(path) => Self::read(&path)?,
            None => Self::rooted_at(&std::env::current_dir().unwrap_or_default()),
        };

        if let Some(cli) = cli {
            config.override_with(cli);
            config.validate()?;
        }
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&text)?;
        config.expand_vars()?;
        config.resolve_dirs(path.parent().unwrap_or(Path::new(".")));
        config.config_path = Some(path.to_path_buf());
        config.validate()?;
        Ok(config)
    }

    /// Defaults with the standard layout under `root`.
    fn rooted_at(root: &Path) -> Self {
        let mut config = Self {
            paths: RawPaths::default(),
            server: ServerConfig::default(),
            live_reload: LiveReloadConfig::default(),
            dirs: SiteDirs::default(),
            config_path: None,
        };
        config.resolve_dirs(root);
        config
    }

    fn override_with(&mut self, cli: &CliSettings) {
        if let Some(host) = &cli.host {
            self.server.host.clone_from(host);
        }
    }

    /// Check ranges and directory layout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_host_port(&self.server.host, "server.host")?;

        match self.live_reload.debounce_ms {
            0 => return Err(invalid("live_reload.debounce_ms must be greater than 0")),
            ms if ms > MAX_DEBOUNCE_MS => {
                return Err(invalid(format!(
                    "live_reload.debounce_ms cannot exceed {MAX_DEBOUNCE_MS}"
                )));
            }
            _ => {}
        }

        // Output is wiped each build and never watched.
        let output = &self.dirs.output_dir;
        for (watched, field) in [
            (&self.dirs.content_dir, "paths.content"),
            (&self.dirs.templates_dir, "paths.templates"),
        ] {
            if watched.starts_with(output) || output.starts_with(watched) {
                return Err(invalid(format!(
                    "paths.output must not overlap {field} ({} vs {})",
                    output.display(),
                    watched.display()
                )));
            }
        }
        Ok(())
    }

    fn expand_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;
        let paths = &mut self.paths;
        for (value, field) in [
            (&mut paths.content, "paths.content"),
            (&mut paths.templates, "paths.templates"),
            (&mut paths.output, "paths.output"),
            (&mut paths.static_dir, "paths.static"),
        ] {
            if let Some(raw) = value {
                *raw = expand::expand_env(raw, field)?;
            }
        }
        Ok(())
    }

    fn resolve_dirs(&mut self, root: &Path) {
        let paths = &self.paths;
        let dir = |value: Option<&str>, default: &str| root.join(value.unwrap_or(default));
        self.dirs = SiteDirs {
            content_dir: dir(paths.content.as_deref(), "content"),
            templates_dir: dir(paths.templates.as_deref(), "templates"),
            output_dir: dir(paths.output.as_deref(), "output"),
            static_dir: dir(paths.static_dir.as_deref(), "static"),
        };
    }
}

/// First `name` found in the working directory or one of its ancestors.
fn find_upwards(name: &str) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    cwd.ancestors()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
