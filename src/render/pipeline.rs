//! Page rendering.
//!
//! # Responsibilities
//! - Resolve a page's layout and compose its template file list
//! - Fetch or compile the template set and execute it with logic data
//! - Inject the live-reload client in development
//! - Walk the error-page fallback chain
//!
//! # Design Decisions
//! - XML pages (feeds) never take a layout
//! - Error pages compose exactly like ordinary pages, so they share the
//!   site's layout and fragments

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Environment;
use crate::render::layout::LayoutResolver;
use crate::render::templates::{RenderError, TemplateCache, TemplateFiles};

/// Websocket endpoint the injected client listens on.
pub const RELOAD_PATH: &str = "/__trellis_reload";

const RELOAD_SNIPPET: &str = r#"
<script>
	if (typeof WebSocket !== "undefined") {
		const protocol = location.protocol === "https:" ? "wss" : "ws";
		const ws = new WebSocket(protocol + "://" + location.host + "/__trellis_reload");
		ws.onmessage = e => {
			if (e.data === "reload") location.reload();
		};
	}
</script>
</body>"#;

/// What a page template produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Html,
    Xml,
}

impl PageKind {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("xml") => PageKind::Xml,
            _ => PageKind::Html,
        }
    }

    /// Extension used for the cache entry.
    pub fn ext(self) -> &'static str {
        match self {
            PageKind::Html => "html",
            PageKind::Xml => "xml",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            PageKind::Html => "text/html; charset=utf-8",
            PageKind::Xml => "application/xml",
        }
    }
}

/// A rendered page.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub body: Vec<u8>,
    pub kind: PageKind,
}

/// Template data for error pages.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorContext {
    pub title: String,
    pub status_code: u16,
    pub message: String,
    pub path: String,
    pub description: String,
}

impl ErrorContext {
    pub fn new(status_code: u16, message: impl Into<String>, path: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            title: format!("{status_code} - {message}"),
            status_code,
            description: message.clone(),
            message,
            path: path.into(),
        }
    }
}

/// Renders pages and error pages for one site.
#[derive(Debug)]
pub struct Renderer {
    layouts: LayoutResolver,
    templates: TemplateCache,
    components_root: PathBuf,
    env: Environment,
}

impl Renderer {
    pub fn new(root: impl Into<PathBuf>, components_root: impl Into<PathBuf>, env: Environment) -> Self {
        Self {
            layouts: LayoutResolver::new(root),
            templates: TemplateCache::new(),
            components_root: components_root.into(),
            env,
        }
    }

    /// Render `page` composed with its layout and `components`.
    pub fn render_page<S: Serialize>(
        &self,
        page: &Path,
        components: &[PathBuf],
        data: S,
    ) -> Result<Rendered, RenderError> {
        let kind = PageKind::from_path(page);
        let layout = match kind {
            PageKind::Html => self.layouts.resolve(page),
            PageKind::Xml => None,
        };

        let files = TemplateFiles::new(layout, page.to_path_buf(), components, &self.components_root);
        let set = self.templates.get_or_compile(&files)?;
        let mut body = set.render(data)?;

        if self.env.is_dev() && kind == PageKind::Html {
            body = inject_reload_client(&body);
        }

        Ok(Rendered {
            body: body.into_bytes(),
            kind,
        })
    }

    /// Render the error page for `ctx`: `<status>.html`, then
    /// `index.html` from `error_dir`. `None` means the caller should fall
    /// back to a bare status line.
    pub fn render_error(
        &self,
        error_dir: &Path,
        components: &[PathBuf],
        ctx: &ErrorContext,
    ) -> Option<Rendered> {
        let candidates = [
            error_dir.join(format!("{}.html", ctx.status_code)),
            error_dir.join("index.html"),
        ];

        for candidate in candidates.iter().filter(|p| p.is_file()) {
            match self.render_page(candidate, components, ctx) {
                Ok(rendered) => return Some(rendered),
                Err(e) => tracing::error!(
                    template = %candidate.display(),
                    error = %e,
                    "Error page failed to render"
                ),
            }
        }

        None
    }

    /// Forget cached layout directives after the site tree changed.
    pub fn invalidate_layouts(&self) {
        self.layouts.clear();
    }

    pub fn template_cache(&self) -> &TemplateCache {
        &self.templates
    }
}

fn inject_reload_client(html: &str) -> String {
    html.replacen("</body>", RELOAD_SNIPPET, 1)
}
