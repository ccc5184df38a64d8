//! Whole-site build: wipe the output tree and regenerate it.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use minijinja::Value;
use serde::Serialize;
use walkdir::WalkDir;

use crate::content::Page;
use crate::error::BuildError;
use crate::markdown::render_markdown;
use crate::templates::TemplateSet;

/// Extension of content files rendered through templates.
const CONTENT_EXTENSION: &str = "md";

/// Directory below the output root receiving static assets.
const STATIC_PREFIX: &str = "static";

/// Placeholder for page bodies in [`SiteBuilder::template_data`].
const REDACTED: &str = "redacted";

/// Something that regenerates the output tree.
///
/// The dev server only depends on this trait so tests can substitute fakes.
pub trait Builder: Send + Sync {
    /// Wipe and repopulate the output tree.
    fn build(&self) -> Result<BuildReport, BuildError>;
}

/// Summary of a completed build.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Pages rendered from markdown.
    pub pages: usize,
    /// Files copied verbatim (content attachments and static assets).
    pub copied: usize,
    /// Wall time of the build.
    pub elapsed: Duration,
}

/// Site directories.
#[derive(Clone, Debug)]
pub struct SiteConfig {
    /// Markdown content tree.
    pub content_dir: PathBuf,
    /// Template directory.
    pub templates_dir: PathBuf,
    /// Output tree.
    pub output_dir: PathBuf,
    /// Static assets, copied to `<output>/static`.
    pub static_dir: PathBuf,
}

/// Data available to a template when rendering one page.
#[derive(Clone, Debug, Serialize)]
pub struct TemplateData {
    /// Rendered HTML body of the page.
    pub content: String,
    /// The page being rendered.
    pub page: Page,
    /// Every page of the site, newest first.
    pub pages: Vec<Page>,
}

/// Builds the site from the filesystem.
pub struct SiteBuilder {
    config: SiteConfig,
}

impl SiteBuilder {
    /// Create a builder for the given directories.
    #[must_use]
    pub fn new(config: SiteConfig) -> Self {
        Self { config }
    }

    /// Site directories.
    #[must_use]
    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Parse every content file, sorted by publication date (newest first), then path.
    pub fn collect_pages(&self) -> Result<Vec<Page>, BuildError> {
        let content_dir = &self.config.content_dir;
        let mut pages = Vec::new();
        for entry in walk(content_dir) {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_content_file(entry.path()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(content_dir) else {
                continue;
            };
            pages.push(Page::read(content_dir, relative)?);
        }
        pages.sort_by(|a, b| {
            Reverse(a.meta.published)
                .cmp(&Reverse(b.meta.published))
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(pages)
    }

    /// Template data for a single content file, with page bodies redacted.
    ///
    /// `source` may be relative to the content root or include it.
    pub fn template_data(&self, source: &Path) -> Result<TemplateData, BuildError> {
        let mut pages = self.collect_pages()?;
        for page in &mut pages {
            REDACTED.clone_into(&mut page.raw_content);
        }
        let page = pages
            .iter()
            .find(|page| {
                page.source_path == source || self.config.content_dir.join(&page.source_path) == source
            })
            .cloned()
            .ok_or_else(|| BuildError::UnknownContent(source.to_path_buf()))?;

        Ok(TemplateData {
            content: REDACTED.to_owned(),
            page,
            pages,
        })
    }

    fn check_templates(&self, templates: &TemplateSet, pages: &[Page]) -> Result<(), BuildError> {
        match pages
            .iter()
            .find(|page| !templates.contains(&page.meta.template_name))
        {
            Some(page) => Err(BuildError::MissingTemplate {
                path: self.config.content_dir.join(&page.source_path),
                name: page.meta.template_name.clone(),
            }),
            None => Ok(()),
        }
    }

    fn wipe_output(&self) -> Result<(), BuildError> {
        let output_dir = &self.config.output_dir;
        if output_dir.exists() {
            std::fs::remove_dir_all(output_dir)
                .map_err(BuildError::io("wipe output directory", output_dir))?;
        }
        std::fs::create_dir_all(output_dir).map_err(BuildError::io("create output directory", output_dir))
    }

    /// Mirror the content tree: directories and non-markdown files.
    fn mirror_content(&self) -> Result<usize, BuildError> {
        let content_dir = &self.config.content_dir;
        let mut copied = 0;
        for entry in walk(content_dir) {
            let entry = entry?;
            let Ok(relative) = entry.path().strip_prefix(content_dir) else {
                continue;
            };
            let target = self.config.output_dir.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target).map_err(BuildError::io("create directory", &target))?;
            } else if !is_content_file(entry.path()) {
                copy_file(entry.path(), &target)?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    fn render_pages(&self, templates: &TemplateSet, pages: &[Page]) -> Result<(), BuildError> {
        let pages_value = Value::from_serialize(pages);
        for page in pages {
            let source = self.config.content_dir.join(&page.source_path);
            let body = render_markdown(&page.raw_content);
            let html = templates.render(
                &page.meta.template_name,
                body,
                &Value::from_serialize(page),
                &pages_value,
            )?;

            let target = self.config.output_dir.join(&page.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(BuildError::io("create directory", parent))?;
            }
            std::fs::write(&target, html).map_err(BuildError::io("write page", &target))?;
            tracing::debug!(source = %source.display(), target = %target.display(), "Rendered page");
        }
        Ok(())
    }

    fn copy_static(&self) -> Result<usize, BuildError> {
        let static_dir = &self.config.static_dir;
        if !static_dir.is_dir() {
            return Ok(0);
        }
        let target_root = self.config.output_dir.join(STATIC_PREFIX);
        let mut copied = 0;
        for entry in walk(static_dir) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(static_dir) else {
                continue;
            };
            copy_file(entry.path(), &target_root.join(relative))?;
            copied += 1;
        }
        Ok(copied)
    }
}

impl Builder for SiteBuilder {
    fn build(&self) -> Result<BuildReport, BuildError> {
        let start = Instant::now();

        // Everything that can fail on bad input happens before the wipe, so a
        // broken template or front matter leaves the previous output in place.
        let templates = TemplateSet::load(&self.config.templates_dir)?;
        let pages = self.collect_pages()?;
        self.check_templates(&templates, &pages)?;

        self.wipe_output()?;
        let mut copied = self.mirror_content()?;
        self.render_pages(&templates, &pages)?;
        copied += self.copy_static()?;

        let report = BuildReport {
            pages: pages.len(),
            copied,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            pages = report.pages,
            copied = report.copied,
            elapsed_ms = report.elapsed.as_secs_f64() * 1000.0,
            "Site built"
        );
        Ok(report)
    }
}

fn is_content_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == CONTENT_EXTENSION)
}

/// Walk `root` in file name order, mapping walk errors to [`BuildError::Walk`].
fn walk(root: &Path) -> impl Iterator<Item = Result<walkdir::DirEntry, BuildError>> {
    let root_path = root.to_path_buf();
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .map(move |entry| {
            entry.map_err(|source| BuildError::Walk {
                path: source.path().map_or_else(|| root_path.clone(), Path::to_path_buf),
                source,
            })
        })
}

fn copy_file(from: &Path, to: &Path) -> Result<(), BuildError> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(BuildError::io("create directory", parent))?;
    }
    std::fs::copy(from, to).map_err(BuildError::io("copy", from))?;
    Ok(())
}
