//! Human-facing terminal messages.
//!
//! Everything goes to stderr; stdout is reserved for command data such as
//! `template-data` YAML.

use std::fmt::Display;

use console::{Style, Term};

pub(crate) struct Output {
    term: Term,
    label: Style,
    ok: Style,
    failed: Style,
    title: Style,
}

impl Output {
    pub(crate) fn new() -> Self {
        Self {
            term: Term::stderr(),
            label: Style::new().dim(),
            ok: Style::new().green(),
            failed: Style::new().red().bold(),
            title: Style::new().cyan().bold(),
        }
    }

    fn line(&self, text: &str) {
        // Nowhere left to report a broken stderr.
        let _ = self.term.write_line(text);
    }

    /// `quire vX.Y.Z` header.
    pub(crate) fn banner(&self, version: &str) {
        self.line(&self.title.apply_to(format!("quire v{version}")).to_string());
    }

    /// An aligned `label: value` pair.
    pub(crate) fn field(&self, label: &str, value: impl Display) {
        self.line(&format!("  {} {value}", self.label.apply_to(format!("{label:>10}:"))));
    }

    pub(crate) fn hint(&self, text: &str) {
        self.line(&self.label.apply_to(text).to_string());
    }

    pub(crate) fn success(&self, text: &str) {
        self.line(&self.ok.apply_to(text).to_string());
    }

    pub(crate) fn error(&self, text: &str) {
        self.line(&self.failed.apply_to(text).to_string());
    }
}
