//! Content files: YAML front matter followed by a markdown body.
//!
//! ```text
//! ---
//! title: Hello
//! templateName: page
//! published: 2024-05-01
//! ---
//! # Hello
//! ```

use std::path::{Component, Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// Front matter delimiter line.
const DELIMITER: &str = "---";

/// Metadata header of a content file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontMatter {
    /// Page title.
    #[serde(default, alias = "Title")]
    pub title: Option<String>,
    /// Stem of the template that renders this page.
    #[serde(default, alias = "TemplateName")]
    pub template_name: String,
    /// Publication date (`YYYY-MM-DD`).
    #[serde(default, alias = "Published")]
    pub published: Option<NaiveDate>,
    /// Last modification date (`YYYY-MM-DD`).
    #[serde(default, alias = "LastModified")]
    pub last_modified: Option<NaiveDate>,
}

/// A parsed content file, as exposed to templates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(flatten)]
    pub meta: FrontMatter,
    /// Output path relative to the output root, `/`-separated (e.g. `blog/post.html`).
    pub path: String,
    /// Source path relative to the content root.
    pub source_path: PathBuf,
    /// Markdown body below the front matter, trimmed.
    pub raw_content: String,
}

impl Page {
    /// Read and parse a content file.
    ///
    /// `relative` is the file's path below `content_dir`.
    pub fn read(content_dir: &Path, relative: &Path) -> Result<Self, BuildError> {
        let full_path = content_dir.join(relative);
        let raw = std::fs::read_to_string(&full_path)
            .map_err(BuildError::io("read content file", &full_path))?;
        Self::parse(&raw, relative).map_err(|err| match err {
            ParseError::FrontMatter(reason) => BuildError::FrontMatter {
                path: full_path,
                reason,
            },
            ParseError::Yaml(source) => BuildError::Yaml {
                path: full_path,
                source,
            },
        })
    }

    fn parse(raw: &str, relative: &Path) -> Result<Self, ParseError> {
        let (header, body) = split_front_matter(raw).ok_or_else(|| {
            ParseError::FrontMatter(format!(
                "content must start with a {DELIMITER:?} line and close the header with another"
            ))
        })?;

        let meta: FrontMatter = if header.trim().is_empty() {
            FrontMatter::default()
        } else {
            serde_yaml::from_str(header).map_err(ParseError::Yaml)?
        };
        if meta.template_name.trim().is_empty() {
            return Err(ParseError::FrontMatter("templateName must be set".to_owned()));
        }

        Ok(Self {
            meta,
            path: output_url_path(relative),
            source_path: relative.to_path_buf(),
            raw_content: body.trim().to_owned(),
        })
    }
}

#[derive(Debug)]
enum ParseError {
    FrontMatter(String),
    Yaml(serde_yaml::Error),
}

/// Split a content file into its YAML header and body.
///
/// Returns `None` when the file doesn't open with a delimiter line or the
/// header is never closed.
fn split_front_matter(raw: &str) -> Option<(&str, &str)> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let rest = raw.strip_prefix(DELIMITER)?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == DELIMITER {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// `guide/intro.md` -> `guide/intro.html`
fn output_url_path(relative: &Path) -> String {
    relative
        .with_extension("html")
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(raw: &str) -> Result<Page, ParseError> {
        Page::parse(raw, Path::new("a.md"))
    }

    #[test]
    fn test_parse_minimal() {
        let page = parse("---\ntemplateName: page\n---\n# Hi\n").unwrap();
        assert_eq!(page.meta.template_name, "page");
        assert_eq!(page.meta.title, None);
        assert_eq!(page.raw_content, "# Hi");
        assert_eq!(page.path, "a.html");
        assert_eq!(page.source_path, PathBuf::from("a.md"));
    }

    #[test]
    fn test_parse_all_fields() {
        let raw = "---\ntitle: Hello\ntemplateName: post\npublished: 2024-05-01\nlastModified: 2024-06-02\n---\nbody";
        let page = parse(raw).unwrap();
        assert_eq!(
            page.meta,
            FrontMatter {
                title: Some("Hello".to_owned()),
                template_name: "post".to_owned(),
                published: NaiveDate::from_ymd_opt(2024, 5, 1),
                last_modified: NaiveDate::from_ymd_opt(2024, 6, 2),
            }
        );
    }

    #[test]
    fn test_parse_pascal_case_aliases() {
        let page = parse("---\nTitle: Old\nTemplateName: page\n---\n").unwrap();
        assert_eq!(page.meta.title.as_deref(), Some("Old"));
        assert_eq!(page.meta.template_name, "page");
    }

    #[test]
    fn test_body_may_contain_delimiter() {
        let page = parse("---\ntemplateName: page\n---\nabove\n\n---\n\nbelow").unwrap();
        assert_eq!(page.raw_content, "above\n\n---\n\nbelow");
    }

    #[test]
    fn test_crlf_line_endings() {
        let page = parse("---\r\ntemplateName: page\r\n---\r\nbody\r\n").unwrap();
        assert_eq!(page.meta.template_name, "page");
        assert_eq!(page.raw_content, "body");
    }

    #[test]
    fn test_missing_front_matter() {
        assert!(matches!(parse("# Hi"), Err(ParseError::FrontMatter(_))));
    }

    #[test]
    fn test_unterminated_front_matter() {
        assert!(matches!(
            parse("---\ntemplateName: page\n# Hi"),
            Err(ParseError::FrontMatter(_))
        ));
    }

    #[test]
    fn test_missing_template_name() {
        let Err(ParseError::FrontMatter(reason)) = parse("---\ntitle: x\n---\nbody") else {
            panic!("expected front matter error");
        };
        assert!(reason.contains("templateName"));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            parse("---\ntemplateName: [unclosed\n---\n"),
            Err(ParseError::Yaml(_))
        ));
    }

    #[test]
    fn test_output_url_path_nested() {
        assert_eq!(output_url_path(Path::new("blog/2024/post.md")), "blog/2024/post.html");
        assert_eq!(output_url_path(Path::new("notes.v2.md")), "notes.v2.html");
    }

    #[test]
    fn test_read_reports_full_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.md"), "no header").unwrap();

        let err = Page::read(dir.path(), Path::new("bad.md")).unwrap_err();

        assert!(matches!(err, BuildError::FrontMatter { .. }));
        assert!(err.to_string().contains("bad.md"));
    }

    #[test]
    fn test_serialized_keys_are_camel_case() {
        let page = parse("---\ntemplateName: page\ntitle: T\n---\nx").unwrap();
        let yaml = serde_yaml::to_string(&page).unwrap();
        assert!(yaml.contains("templateName: page"), "{yaml}");
        assert!(yaml.contains("sourcePath: a.md"), "{yaml}");
        assert!(yaml.contains("rawContent: x"), "{yaml}");
    }
}
