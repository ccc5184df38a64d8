//! Reload script injection into generated HTML.
//!
//! Anchors are plain string matches, not an HTML parse: `</head>` is tried
//! first, then the exact literal `<html>`. Tags with attributes or different
//! case are not recognised. Injecting twice yields two copies of the script.

use std::fs::Permissions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Client snippet that reloads the page when the server says so.
pub const RELOAD_SCRIPT: &str = r#"<script>
(() => {
  const scheme = location.protocol === "https:" ? "wss:" : "ws:";
  const socket = new WebSocket(`${scheme}//${location.host}/websocket`);
  socket.addEventListener("message", (event) => {
    if (event.data === "reload") location.reload();
  });
})();
</script>"#;

const HEAD_CLOSE: &str = "</head>";
const HTML_OPEN: &str = "<html>";
const HTML_EXTENSION: &str = "html";

/// Error injecting into a single file.
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("no </head> or <html> anchor in {}", path.display())]
    AnchorNotFound { path: PathBuf },

    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl InjectError {
    fn io(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }
}

/// The output tree itself could not be walked.
#[derive(Debug, thiserror::Error)]
#[error("failed to walk {}: {source}", path.display())]
pub struct InjectWalkError {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
}

/// Outcome of [`inject_all`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InjectReport {
    pub injected: usize,
    pub failed: usize,
}

/// Insert [`RELOAD_SCRIPT`] into the HTML file at `path`.
///
/// The file is read fully as bytes, so any encoding works, and replaced
/// atomically with its permissions kept. When no anchor is found the file
/// is left untouched.
pub fn inject_reload_script(path: &Path) -> Result<(), InjectError> {
    let html = std::fs::read(path).map_err(InjectError::io("read", path))?;
    let injected = insert_script(&html).ok_or_else(|| InjectError::AnchorNotFound {
        path: path.to_path_buf(),
    })?;
    let permissions = std::fs::metadata(path)
        .map_err(InjectError::io("stat", path))?
        .permissions();
    write_atomic(path, &injected, permissions)
}

/// Inject into every `*.html` file below `output_dir`.
///
/// Per-file failures are logged and counted; only a failure to walk the tree
/// is returned as an error.
pub fn inject_all(output_dir: &Path) -> Result<InjectReport, InjectWalkError> {
    let mut report = InjectReport::default();
    for entry in WalkDir::new(output_dir).sort_by_file_name() {
        let entry = entry.map_err(|source| InjectWalkError {
            path: source
                .path()
                .map_or_else(|| output_dir.to_path_buf(), Path::to_path_buf),
            source,
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != HTML_EXTENSION) {
            continue;
        }
        match inject_reload_script(path) {
            Ok(()) => report.injected += 1,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Reload script not injected");
                report.failed += 1;
            }
        }
    }
    tracing::debug!(injected = report.injected, failed = report.failed, "Injected reload script");
    Ok(report)
}

fn find(haystack: &[u8], needle: &str) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle.as_bytes())
}

fn insert_script(html: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(html.len() + RELOAD_SCRIPT.len() + 16);
    if let Some(at) = find(html, HEAD_CLOSE) {
        out.extend_from_slice(&html[..at]);
        out.extend_from_slice(RELOAD_SCRIPT.as_bytes());
        out.extend_from_slice(&html[at..]);
    } else {
        let at = find(html, HTML_OPEN)? + HTML_OPEN.len();
        out.extend_from_slice(&html[..at]);
        out.extend_from_slice(b"<head>");
        out.extend_from_slice(RELOAD_SCRIPT.as_bytes());
        out.extend_from_slice(HEAD_CLOSE.as_bytes());
        out.extend_from_slice(&html[at..]);
    }
    Some(out)
}

/// Write through a temp file in the same directory, then rename over `path`.
///
/// Temp files are created owner-only, so `permissions` are applied before
/// the rename.
fn write_atomic(path: &Path, contents: &[u8], permissions: Permissions) -> Result<(), InjectError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file =
        tempfile::NamedTempFile::new_in(dir).map_err(InjectError::io("create temp file in", dir))?;
    file.write_all(contents)
        .map_err(InjectError::io("write temp file for", path))?;
    file.as_file()
        .set_permissions(permissions)
        .map_err(InjectError::io("set permissions for", path))?;
    file.persist(path)
        .map_err(|err| InjectError::io("replace", path)(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn html_file(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_inserts_before_head_close() {
        let (_dir, path) = html_file("<html><head><title>x</title></head><body>b</body></html>");

        inject_reload_script(&path).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("<html><head><title>x</title>{RELOAD_SCRIPT}</head><body>b</body></html>")
        );
    }

    #[test]
    fn test_uses_first_head_close() {
        let (_dir, path) = html_file("<head></head><head></head>");

        inject_reload_script(&path).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("<head>{RELOAD_SCRIPT}</head><head></head>")
        );
    }

    #[test]
    fn test_synthesizes_head_after_html() {
        let (_dir, path) = html_file("<!DOCTYPE html><html><body>b</body></html>");

        inject_reload_script(&path).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("<!DOCTYPE html><html><head>{RELOAD_SCRIPT}</head><body>b</body></html>")
        );
    }

    #[test]
    fn test_no_anchor_leaves_file_untouched() {
        let (_dir, path) = html_file("<p>fragment</p>");

        let err = inject_reload_script(&path).unwrap_err();

        assert!(matches!(err, InjectError::AnchorNotFound { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "<p>fragment</p>");
    }

    #[test]
    fn test_html_with_attributes_is_not_an_anchor() {
        let (_dir, path) = html_file("<html lang=\"en\"><body></body></html>");

        let err = inject_reload_script(&path).unwrap_err();

        assert!(matches!(err, InjectError::AnchorNotFound { .. }));
    }

    #[test]
    fn test_injecting_twice_duplicates_script() {
        let (_dir, path) = html_file("<html><head></head></html>");

        inject_reload_script(&path).unwrap();
        inject_reload_script(&path).unwrap();

        let html = fs::read_to_string(&path).unwrap();
        assert_eq!(html.matches(RELOAD_SCRIPT).count(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = inject_reload_script(&dir.path().join("gone.html")).unwrap_err();

        assert!(matches!(err, InjectError::Io { action: "read", .. }));
    }

    #[test]
    fn test_non_utf8_bytes_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.html");
        fs::write(&path, b"<html><head><title>caf\xE9</title></head></html>").unwrap();

        inject_reload_script(&path).unwrap();

        let mut expected = b"<html><head><title>caf\xE9</title>".to_vec();
        expected.extend_from_slice(RELOAD_SCRIPT.as_bytes());
        expected.extend_from_slice(b"</head></html>");
        assert_eq!(fs::read(&path).unwrap(), expected);
    }

    #[cfg(unix)]
    #[test]
    fn test_keeps_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, path) = html_file("<html><head></head></html>");
        fs::set_permissions(&path, Permissions::from_mode(0o644)).unwrap();

        inject_reload_script(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_script_targets_websocket_on_page_host() {
        assert!(RELOAD_SCRIPT.contains("location.host"));
        assert!(RELOAD_SCRIPT.contains("/websocket"));
        assert!(RELOAD_SCRIPT.contains("\"reload\""));
    }

    #[test]
    fn test_inject_all_walks_tree_and_counts_failures() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("blog")).unwrap();
        fs::write(root.join("index.html"), "<html><head></head></html>").unwrap();
        fs::write(root.join("blog/post.html"), "<html><body></body></html>").unwrap();
        fs::write(root.join("fragment.html"), "<p>no anchor</p>").unwrap();
        fs::write(root.join("notes.txt"), "<html><head></head></html>").unwrap();

        let report = inject_all(root).unwrap();

        assert_eq!(
            report,
            InjectReport {
                injected: 2,
                failed: 1
            }
        );
        assert!(fs::read_to_string(root.join("blog/post.html")).unwrap().contains(RELOAD_SCRIPT));
        assert_eq!(
            fs::read_to_string(root.join("notes.txt")).unwrap(),
            "<html><head></head></html>"
        );
    }

    #[test]
    fn test_inject_all_missing_root_is_walk_error() {
        let dir = tempfile::tempdir().unwrap();

        assert!(inject_all(&dir.path().join("missing")).is_err());
    }
}
