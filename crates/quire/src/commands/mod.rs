//! CLI command implementations.

mod build;
mod serve;
mod template_data;

pub(crate) use build::BuildArgs;
pub(crate) use serve::ServeArgs;
pub(crate) use template_data::TemplateDataArgs;

use quire_config::Config;
use quire_site::SiteConfig;

/// Builder paths from a loaded config.
fn site_config(config: &Config) -> SiteConfig {
    let paths = &config.dirs;
    SiteConfig {
        content_dir: paths.content_dir.clone(),
        templates_dir: paths.templates_dir.clone(),
        output_dir: paths.output_dir.clone(),
        static_dir: paths.static_dir.clone(),
    }
}
