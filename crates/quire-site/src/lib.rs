//! Static site builder for quire.
//!
//! Turns a content tree of markdown files with YAML front matter into an
//! output tree of HTML pages, using a set of `minijinja` templates.
//!
//! # Architecture
//!
//! ```text
//! content/**/*.md ──► Page (front matter + body)
//!                        │
//!                        ├─► markdown::render_markdown ──► HTML body
//!                        │
//!                        └─► TemplateSet::render(templateName) ──► output/**/*.html
//!
//! content/** (other files) ──► copied verbatim
//! static/**                ──► output/static/**
//! ```
//!
//! The dev server consumes the builder through the [`Builder`] trait.

mod builder;
mod content;
mod error;
mod markdown;
mod templates;

pub use builder::{BuildReport, Builder, SiteBuilder, SiteConfig, TemplateData};
pub use content::{FrontMatter, Page};
pub use error::BuildError;
pub use markdown::render_markdown;
pub use templates::TemplateSet;
