//! Template set loaded from the template root.
//!
//! Every `*.html` file directly inside the template directory is registered
//! under its file stem, so `templates/page.html` is referenced as `page` both
//! from front matter (`templateName: page`) and from other templates
//! (`{% extends "base" %}`).

use std::path::Path;

use minijinja::{AutoEscape, Environment, Value, context};

use crate::error::BuildError;

/// File extension of template files.
const TEMPLATE_EXTENSION: &str = "html";

/// A loaded set of templates.
pub struct TemplateSet {
    env: Environment<'static>,
}

impl TemplateSet {
    /// Load every template in `dir` (non-recursive).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory can't be read or a template fails to parse.
    pub fn load(dir: &Path) -> Result<Self, BuildError> {
        let mut env = Environment::new();
        // Template names are stems, so extension-based escaping would never kick in.
        env.set_auto_escape_callback(|_| AutoEscape::Html);

        let entries = std::fs::read_dir(dir).map_err(BuildError::io("read template directory", dir))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(BuildError::io("read template directory", dir))?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == TEMPLATE_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let source =
                std::fs::read_to_string(&path).map_err(BuildError::io("read template", &path))?;
            env.add_template_owned(name.clone(), source)
                .map_err(|source| BuildError::Template { name, source })?;
        }

        tracing::debug!(dir = %dir.display(), count = env.templates().count(), "Loaded templates");
        Ok(Self { env })
    }

    /// Whether a template with the given name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.env.get_template(name).is_ok()
    }

    /// Names of all loaded templates, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.env.templates().map(|(name, _)| name.to_owned()).collect();
        names.sort();
        names
    }

    /// Render template `name`.
    ///
    /// `content` is inserted unescaped; `page` and `pages` are serialized page records.
    pub(crate) fn render(
        &self,
        name: &str,
        content: String,
        page: &Value,
        pages: &Value,
    ) -> Result<String, BuildError> {
        let template = self.env.get_template(name).map_err(|source| BuildError::Template {
            name: name.to_owned(),
            source,
        })?;
        template
            .render(context! {
                content => Value::from_safe_string(content),
                page => page,
                pages => pages,
            })
            .map_err(|source| BuildError::Template {
                name: name.to_owned(),
                source,
            })
    }
}
