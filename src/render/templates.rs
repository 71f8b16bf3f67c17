//! Compiled template sets and their cache.
//!
//! # Responsibilities
//! - Compose layout + page + shared fragments into one template set
//! - Key compiled sets by file identity (paths and mtimes)
//! - Render a set's entry template with logic data
//!
//! # Design Decisions
//! - Key covers paths and modification times, not contents: touching any
//!   participating file yields a new key, the old entry simply goes unused
//! - Entries are never evicted; the key space is bounded by distinct
//!   route/layout combinations, not by traffic
//! - Every template escapes HTML, whatever its extension
//!
//! # Helpers
//! - `props(k1, v1, ...)`: a map from alternating string keys and values
//! - `safeHTML(s)`: function and filter; marks a string as trusted HTML,
//!   any other value becomes an empty string

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use dashmap::DashMap;
use minijinja::value::{Rest, Value};
use minijinja::{AutoEscape, Environment, ErrorKind};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Name the layout file is registered under. Pages with a layout extend it.
pub const LAYOUT_TEMPLATE: &str = "layout";

/// Errors from composing or executing templates.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template error: cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template error: {0}")]
    Parse(#[source] minijinja::Error),

    #[error("Template execution error: {0}")]
    Execute(#[source] minijinja::Error),

    #[error("Template error: render task failed: {0}")]
    Task(#[source] tokio::task::JoinError),
}

/// The files one render is composed from, in registration order.
#[derive(Debug, Clone)]
pub struct TemplateFiles {
    /// Declared layout. A declared but missing file is skipped at compile
    /// time, which surfaces as an execution error on render.
    pub layout: Option<PathBuf>,
    pub page: PathBuf,
    /// Shared fragments, paired with the name they are registered under.
    pub components: Vec<(String, PathBuf)>,
}

impl TemplateFiles {
    /// Build the file list, naming fragments relative to `components_root`.
    pub fn new(
        layout: Option<PathBuf>,
        page: PathBuf,
        components: &[PathBuf],
        components_root: &Path,
    ) -> Self {
        let components = components
            .iter()
            .map(|path| (fragment_name(path, components_root), path.clone()))
            .collect();
        Self {
            layout,
            page,
            components,
        }
    }

    /// Every participating path: layout, page, then fragments.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.layout
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(self.page.as_path()))
            .chain(self.components.iter().map(|(_, p)| p.as_path()))
    }

    /// SHA-256 over each path and its modification time.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for path in self.paths() {
            hasher.update(path.to_string_lossy().as_bytes());
            if let Some(nanos) = mtime_nanos(path) {
                hasher.update(nanos.to_string().as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    /// The template executed for this set: the page, by file name.
    pub fn entry_name(&self) -> String {
        self.page
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string())
    }
}

fn fragment_name(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn mtime_nanos(path: &Path) -> Option<u128> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.duration_since(UNIX_EPOCH).ok()?.as_nanos())
}

/// A parsed, ready-to-render template set.
pub struct TemplateSet {
    env: Environment<'static>,
    entry: String,
}

impl std::fmt::Debug for TemplateSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateSet").field("entry", &self.entry).finish()
    }
}

impl TemplateSet {
    /// Read and parse every file of `files`.
    pub fn compile(files: &TemplateFiles) -> Result<Self, RenderError> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.add_function("props", props);
        env.add_function("safeHTML", safe_html);
        env.add_filter("safeHTML", safe_html);

        for (name, path) in &files.components {
            env.add_template_owned(name.clone(), read(path)?)
                .map_err(RenderError::Parse)?;
        }

        if let Some(layout) = &files.layout {
            if layout.is_file() {
                env.add_template_owned(LAYOUT_TEMPLATE, read(layout)?)
                    .map_err(RenderError::Parse)?;
            } else {
                tracing::warn!(layout = %layout.display(), "Skipping missing layout");
            }
        }

        let entry = files.entry_name();
        let mut source = read(&files.page)?;
        if files.layout.is_some() {
            source.insert_str(0, &format!("{{% extends \"{LAYOUT_TEMPLATE}\" %}}"));
        }
        env.add_template_owned(entry.clone(), source)
            .map_err(RenderError::Parse)?;

        Ok(Self { env, entry })
    }

    /// Execute the entry template.
    pub fn render<S: Serialize>(&self, data: S) -> Result<String, RenderError> {
        let template = self.env.get_template(&self.entry).map_err(RenderError::Execute)?;
        template.render(data).map_err(RenderError::Execute)
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }
}

fn props(values: Rest<Value>) -> Result<Value, minijinja::Error> {
    if values.len() % 2 != 0 {
        return Err(minijinja::Error::new(
            ErrorKind::InvalidOperation,
            "props takes an even number of arguments",
        ));
    }
    let mut map = BTreeMap::new();
    for pair in values.chunks(2) {
        let Some(key) = pair[0].as_str() else {
            return Err(minijinja::Error::new(
                ErrorKind::InvalidOperation,
                "props keys must be strings",
            ));
        };
        map.insert(key.to_string(), pair[1].clone());
    }
    Ok(Value::from(map))
}

fn safe_html(value: Value) -> Value {
    match value.as_str() {
        Some(s) => Value::from_safe_string(s.to_string()),
        None => Value::from_safe_string(String::new()),
    }
}

fn read(path: &Path) -> Result<String, RenderError> {
    fs::read_to_string(path).map_err(|source| RenderError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Compiled sets keyed by [`TemplateFiles::fingerprint`].
#[derive(Debug, Default)]
pub struct TemplateCache {
    sets: DashMap<String, Arc<TemplateSet>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached set for `files`, compiling it on first use.
    pub fn get_or_compile(&self, files: &TemplateFiles) -> Result<Arc<TemplateSet>, RenderError> {
        let key = files.fingerprint();
        if let Some(set) = self.sets.get(&key) {
            return Ok(set.clone());
        }

        let set = Arc::new(TemplateSet::compile(files)?);
        tracing::debug!(key = %key, entry = %set.entry(), "Template set compiled");

        // Two racing compiles keep whichever landed first.
        Ok(self.sets.entry(key).or_insert(set).clone())
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Site {
        dir: tempfile::TempDir,
    }

    impl Site {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn write(&self, rel: &str, body: &str) -> PathBuf {
            let path = self.dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, body).unwrap();
            path
        }

        fn components(&self) -> PathBuf {
            self.dir.path().join("components")
        }
    }

    #[test]
    fn test_page_without_layout() {
        let site = Site::new();
        let page = site.write("routes/index.html", "<h1>{{ title }}</h1>");

        let files = TemplateFiles::new(None, page, &[], &site.components());
        let set = TemplateSet::compile(&files).unwrap();

        assert_eq!(set.render(json!({"title": "Home"})).unwrap(), "<h1>Home</h1>");
    }

    #[test]
    fn test_page_inside_layout_with_fragment() {
        let site = Site::new();
        let layout = site.write(
            "components/layouts/base.html",
            "<html><body>{% include \"nav.html\" %}{% block content %}{% endblock %}</body></html>",
        );
        let nav = site.write("components/nav.html", "<nav>{{ site }}</nav>");
        let page = site.write(
            "routes/index.html",
            "<!-- layout: components/layouts/base.html -->\n{% block content %}<p>{{ body }}</p>{% endblock %}",
        );

        let files = TemplateFiles::new(
            Some(layout.clone()),
            page,
            &[layout, nav],
            &site.components(),
        );
        let html = TemplateSet::compile(&files)
            .unwrap()
            .render(json!({"site": "Demo", "body": "hi"}))
            .unwrap();

        assert_eq!(html, "<html><body><nav>Demo</nav><p>hi</p></body></html>");
    }

    #[test]
    fn test_values_are_escaped() {
        let site = Site::new();
        let page = site.write("routes/feed/index.xml", "<title>{{ t }}</title>");

        let files = TemplateFiles::new(None, page, &[], &site.components());
        let out = TemplateSet::compile(&files)
            .unwrap()
            .render(json!({"t": "<script>"}))
            .unwrap();

        assert_eq!(out, "<title>&lt;script&gt;</title>");
    }

    #[test]
    fn test_props_passes_named_values_to_a_fragment() {
        let site = Site::new();
        let card = site.write("components/card.html", "{{ card.name }}-{{ card.count }}");
        let page = site.write(
            "routes/index.html",
            "{% with card = props(\"name\", who, \"count\", 2) %}{% include \"card.html\" %}{% endwith %}",
        );

        let files = TemplateFiles::new(None, page, &[card], &site.components());
        let out = TemplateSet::compile(&files)
            .unwrap()
            .render(json!({"who": "Ada"}))
            .unwrap();

        assert_eq!(out, "Ada-2");
    }

    #[test]
    fn test_props_rejects_odd_arguments() {
        let site = Site::new();
        let page = site.write("routes/index.html", "{{ props(\"name\", \"Ada\", \"orphan\") }}");

        let files = TemplateFiles::new(None, page, &[], &site.components());
        let err = TemplateSet::compile(&files).unwrap().render(json!({})).unwrap_err();
        assert!(matches!(err, RenderError::Execute(_)));

        let page = site.write("routes/keys/index.html", "{{ props(1, \"one\") }}");
        let files = TemplateFiles::new(None, page, &[], &site.components());
        let err = TemplateSet::compile(&files).unwrap().render(json!({})).unwrap_err();
        assert!(err.to_string().contains("props keys must be strings"), "{err}");
    }

    #[test]
    fn test_safe_html_skips_escaping() {
        let site = Site::new();
        let page = site.write(
            "routes/index.html",
            "{{ safeHTML(html) }}|{{ html | safeHTML }}|{{ html }}|{{ safeHTML(n) }}.",
        );

        let files = TemplateFiles::new(None, page, &[], &site.components());
        let out = TemplateSet::compile(&files)
            .unwrap()
            .render(json!({"html": "<b>x</b>", "n": 123}))
            .unwrap();

        assert_eq!(out, "<b>x</b>|<b>x</b>|&lt;b&gt;x&lt;&#x2f;b&gt;|.");
    }

    #[test]
    fn test_missing_layout_is_an_execution_error() {
        let site = Site::new();
        let page = site.write("routes/index.html", "{% block content %}x{% endblock %}");

        let files = TemplateFiles::new(
            Some(site.dir.path().join("components/missing.html")),
            page,
            &[],
            &site.components(),
        );
        let set = TemplateSet::compile(&files).unwrap();
        let err = set.render(json!({})).unwrap_err();

        assert!(matches!(err, RenderError::Execute(_)));
        assert!(err.to_string().starts_with("Template execution error"));
    }

    #[test]
    fn test_syntax_error_is_a_parse_error() {
        let site = Site::new();
        let page = site.write("routes/index.html", "{% if %}");

        let files = TemplateFiles::new(None, page, &[], &site.components());
        assert!(matches!(TemplateSet::compile(&files), Err(RenderError::Parse(_))));
    }

    #[test]
    fn test_cache_reuses_until_mtime_changes() {
        let site = Site::new();
        let page = site.write("routes/index.html", "v1");
        let files = TemplateFiles::new(None, page.clone(), &[], &site.components());

        let cache = TemplateCache::new();
        let a = cache.get_or_compile(&files).unwrap();
        let b = cache.get_or_compile(&files).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        fs::write(&page, "v2").unwrap();
        let file = fs::File::options().write(true).open(&page).unwrap();
        file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();
        drop(file);

        let c = cache.get_or_compile(&files).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.render(json!({})).unwrap(), "v2");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_fingerprint_depends_on_paths() {
        let site = Site::new();
        let a = site.write("routes/a/index.html", "");
        let b = site.write("routes/b/index.html", "");

        let fa = TemplateFiles::new(None, a, &[], &site.components()).fingerprint();
        let fb = TemplateFiles::new(None, b, &[], &site.components()).fingerprint();
        assert_ne!(fa, fb);
        assert_eq!(fa.len(), 64);
    }
}
