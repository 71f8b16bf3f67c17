//! Layout directive discovery.
//!
//! A page names its layout with a comment line near the top:
//!
//! ```text
//! <!-- layout: components/layouts/base.html -->
//! ```
//!
//! The path is relative to the site root. Results are cached per page
//! path; a page whose file cannot be read resolves to "no layout".

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use dashmap::DashMap;

/// Only this many leading lines are scanned.
pub const DIRECTIVE_SCAN_LINES: usize = 50;

const DIRECTIVE_OPEN: &str = "<!-- layout:";
const DIRECTIVE_CLOSE: &str = "-->";

/// Resolves and caches layout directives.
#[derive(Debug)]
pub struct LayoutResolver {
    root: PathBuf,
    cache: DashMap<PathBuf, Option<PathBuf>>,
}

impl LayoutResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: DashMap::new(),
        }
    }

    /// The layout file declared by `page`, if any.
    pub fn resolve(&self, page: &Path) -> Option<PathBuf> {
        if let Some(hit) = self.cache.get(page) {
            return hit.clone();
        }

        let layout = scan_directive(page).map(|rel| self.root.join(rel));
        self.cache
            .entry(page.to_path_buf())
            .or_insert(layout)
            .clone()
    }

    /// Drop every cached directive. Used after the site tree changes.
    pub fn clear(&self) {
        self.cache.clear();
    }
}

fn scan_directive(page: &Path) -> Option<String> {
    let file = match File::open(page) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(page = %page.display(), error = %e, "Cannot open page for layout scan");
            return None;
        }
    };

    for line in BufReader::new(file).lines().take(DIRECTIVE_SCAN_LINES) {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(page = %page.display(), error = %e, "Error scanning for layout directive");
                return None;
            }
        };
        if let Some(layout) = parse_directive(&line) {
            return Some(layout.to_string());
        }
    }

    None
}

/// Extract the layout path from a directive line.
pub fn parse_directive(line: &str) -> Option<&str> {
    let layout = line
        .trim()
        .strip_prefix(DIRECTIVE_OPEN)?
        .strip_suffix(DIRECTIVE_CLOSE)?
        .trim();
    (!layout.is_empty()).then_some(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_directive() {
        assert_eq!(
            parse_directive("  <!-- layout: components/layout.html -->  "),
            Some("components/layout.html")
        );
        assert_eq!(parse_directive("<!--layout: x.html-->"), None);
        assert_eq!(parse_directive("<!-- layout: -->"), None);
        assert_eq!(parse_directive("<h1>layout: x</h1>"), None);
    }

    #[test]
    fn test_resolve_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("page.html");
        fs::write(&page, "\n\n<!-- layout: components/base.html -->\n<p>hi</p>").unwrap();

        let resolver = LayoutResolver::new(dir.path());
        assert_eq!(
            resolver.resolve(&page),
            Some(dir.path().join("components/base.html"))
        );
    }

    #[test]
    fn test_directive_past_scan_window_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("page.html");
        let mut source = "<p></p>\n".repeat(DIRECTIVE_SCAN_LINES);
        source.push_str("<!-- layout: late.html -->\n");
        fs::write(&page, source).unwrap();

        assert_eq!(LayoutResolver::new(dir.path()).resolve(&page), None);
    }

    #[test]
    fn test_result_is_cached_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("page.html");
        fs::write(&page, "<!-- layout: a.html -->").unwrap();

        let resolver = LayoutResolver::new(dir.path());
        assert_eq!(resolver.resolve(&page), Some(dir.path().join("a.html")));

        fs::write(&page, "<!-- layout: b.html -->").unwrap();
        assert_eq!(resolver.resolve(&page), Some(dir.path().join("a.html")));

        resolver.clear();
        assert_eq!(resolver.resolve(&page), Some(dir.path().join("b.html")));
    }

    #[test]
    fn test_missing_page_has_no_layout() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = LayoutResolver::new(dir.path());
        assert_eq!(resolver.resolve(&dir.path().join("nope.html")), None);
    }
}
