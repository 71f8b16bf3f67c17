//! Route table construction and lookup.
//!
//! # Responsibilities
//! - Walk the page and API trees and compile one route per qualifying
//!   directory
//! - Collect the shared fragment files every page set is composed with
//! - Look up the first route matching a normalized path
//!
//! # Design Decisions
//! - Immutable after construction; reloads build a fresh table that the
//!   orchestrator swaps in whole
//! - Static routes sorted ahead of dynamic ones (stable sort, so walk
//!   order is kept within each group)
//! - O(n) scan, first match wins
//! - Unreadable directories are logged and skipped, never fatal

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::LayoutConfig;
use crate::routing::matcher::{Params, RoutePattern};

/// Directory prefix reserved for error pages; excluded from routing.
pub const ERROR_DIR_PREFIX: &str = "_error";

/// Page template file names, in order of preference.
pub const PAGE_TEMPLATES: [&str; 2] = ["index.html", "index.xml"];

/// Logic unit file name inside a page directory.
pub const LOGIC_UNIT: &str = "index.server.rs";

/// API handler file names, in order of preference.
pub const API_UNITS: [&str; 2] = ["index.rs", "index.server.rs"];

/// Errors raised while building a route table.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("invalid route pattern for {dir}: {source}")]
    Pattern {
        dir: PathBuf,
        #[source]
        source: regex::Error,
    },
}

/// A page route.
#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: RoutePattern,
    /// Page template (`index.html` or `index.xml`).
    pub template: PathBuf,
    /// Logic unit location; the file may not exist.
    pub logic: PathBuf,
    /// The route's directory.
    pub dir: PathBuf,
}

/// An API route. No template, JSON results only.
#[derive(Debug, Clone)]
pub struct ApiRoute {
    pub pattern: RoutePattern,
    pub logic: PathBuf,
    pub dir: PathBuf,
}

/// A successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a, R> {
    pub route: &'a R,
    pub params: Params,
}

/// The compiled routing state of a site.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    api_routes: Vec<ApiRoute>,
    components: Vec<PathBuf>,
}

impl RouteTable {
    /// Build the table from the site tree described by `layout`.
    pub fn load(layout: &LayoutConfig) -> Result<Self, RoutingError> {
        let routes = load_page_routes(&layout.routes_path())?;
        let api_routes = load_api_routes(&layout.api_path())?;
        let components = load_components(&layout.components_path());

        tracing::debug!(
            routes = routes.len(),
            api_routes = api_routes.len(),
            components = components.len(),
            "Route table built"
        );

        Ok(Self {
            routes,
            api_routes,
            components,
        })
    }

    /// Find the page route for a normalized path.
    pub fn match_page(&self, path: &str) -> Option<RouteMatch<'_, Route>> {
        self.routes.iter().find_map(|route| {
            route
                .pattern
                .captures(path)
                .map(|params| RouteMatch { route, params })
        })
    }

    /// Find the API route for a path relative to the API prefix.
    pub fn match_api(&self, path: &str) -> Option<RouteMatch<'_, ApiRoute>> {
        self.api_routes.iter().find_map(|route| {
            route
                .pattern
                .captures(path)
                .map(|params| RouteMatch { route, params })
        })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn api_routes(&self) -> &[ApiRoute] {
        &self.api_routes
    }

    /// Shared fragment files, in walk order.
    pub fn components(&self) -> &[PathBuf] {
        &self.components
    }
}

fn load_page_routes(base: &Path) -> Result<Vec<Route>, RoutingError> {
    let mut routes = Vec::new();

    for dir in walk_dirs(base, true) {
        let Some(template) = PAGE_TEMPLATES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
        else {
            continue;
        };

        let pattern = compile_dir(base, &dir)?;
        routes.push(Route {
            pattern,
            template,
            logic: dir.join(LOGIC_UNIT),
            dir,
        });
    }

    // Static before dynamic; stable keeps walk order inside each group.
    routes.sort_by_key(|r| r.pattern.is_dynamic());
    Ok(routes)
}

fn load_api_routes(base: &Path) -> Result<Vec<ApiRoute>, RoutingError> {
    let mut routes = Vec::new();

    for dir in walk_dirs(base, false) {
        let Some(logic) = API_UNITS
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
        else {
            continue;
        };

        let pattern = compile_dir(base, &dir)?;
        routes.push(ApiRoute { pattern, logic, dir });
    }

    routes.sort_by_key(|r| r.pattern.is_dynamic());
    Ok(routes)
}

fn compile_dir(base: &Path, dir: &Path) -> Result<RoutePattern, RoutingError> {
    let segments: Vec<String> = dir
        .strip_prefix(base)
        .unwrap_or(dir)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    RoutePattern::compile(&segments).map_err(|source| RoutingError::Pattern {
        dir: dir.to_path_buf(),
        source,
    })
}

/// Every directory under `base` (inclusive), depth first, sorted by name.
fn walk_dirs(base: &Path, skip_error_pages: bool) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![base.to_path_buf()];

    while let Some(dir) = stack.pop() {
        if !dir.is_dir() {
            continue;
        }
        let mut children = match read_sorted(&dir) {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };
        out.push(dir);

        children.retain(|p| p.is_dir());
        if skip_error_pages {
            children.retain(|p| !file_name_starts_with(p, ERROR_DIR_PREFIX));
        }
        // Reverse so the stack pops in name order.
        stack.extend(children.into_iter().rev());
    }

    out
}

fn load_components(base: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![base.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = read_sorted(&dir) else {
            continue;
        };
        for path in entries.into_iter().rev() {
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "html") {
                files.push(path);
            }
        }
    }

    files.sort();
    files
}

fn read_sorted(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

fn file_name_starts_with(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(prefix))
}
