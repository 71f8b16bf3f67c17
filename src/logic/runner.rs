//! Runner program synthesis for the compile-and-run strategy.
//!
//! # Responsibilities
//! - Locate the module root that owns a logic unit
//! - Produce a throwaway Cargo project that includes the unit as a module,
//!   rebuilds the request from a captured [`ExecContext`], calls
//!   `handle_request` and prints the JSON result
//!
//! # Design Decisions
//! - The handler is pulled in with `#[path]` and invoked through
//!   `trellis_sdk::handle`, the same entry point a plugin build exports,
//!   so one source serves both strategies
//! - `trellis-sdk` types are re-exported at the runner root, so handlers
//!   may import them from `trellis_sdk` or from `super`
//! - Dependencies are copied from the module root's manifest; relative
//!   `path` dependencies are made absolute
//! - The context travels as a JSON string literal baked into the program

use std::path::{Path, PathBuf};

use minijinja::{context, Environment};

use crate::logic::{ExecContext, LogicError, NOT_FOUND_EXIT_CODE, NOT_FOUND_SENTINEL};

const MAIN_TEMPLATE: &str = r#"// Runner for {{ relative }}. Generated per request; do not edit.
#![allow(dead_code, unused_imports)]

pub use trellis_sdk::{Data, HandlerResult, NotFound, Params, Request};

#[path = {{ handler }}]
mod handler;

const CONTEXT: &str = {{ context }};

fn fail(message: &dyn std::fmt::Display) -> ! {
    eprintln!("{message}");
    std::process::exit(1)
}

fn main() {
    match trellis_sdk::handle(CONTEXT.as_bytes(), handler::handle_request) {
        trellis_sdk::Envelope::Data(data) => match serde_json::to_string(&data) {
            Ok(json) => println!("{json}"),
            Err(e) => fail(&e),
        },
        trellis_sdk::Envelope::Error { not_found: true, .. } => {
            eprintln!("{{ sentinel }}");
            std::process::exit({{ exit_code }})
        }
        trellis_sdk::Envelope::Error { message, .. } => fail(&message),
    }
}
"#;

/// Package name of the logic-unit SDK.
pub const SDK_CRATE: &str = "trellis-sdk";

/// The crate that owns a logic unit.
#[derive(Debug, Clone)]
pub struct ModuleRoot {
    pub dir: PathBuf,
    pub manifest: toml::Table,
}

impl ModuleRoot {
    /// Walk up from `start` to the nearest directory whose `Cargo.toml`
    /// declares a `[package]`.
    pub async fn discover(start: &Path) -> Result<Self, LogicError> {
        let first = if start.is_dir() { Some(start) } else { start.parent() };

        for dir in first.into_iter().flat_map(Path::ancestors) {
            let manifest_path = dir.join("Cargo.toml");
            let raw = match tokio::fs::read_to_string(&manifest_path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(LogicError::io(
                        format!("failed to read {}", manifest_path.display()),
                        e,
                    ))
                }
            };
            let manifest: toml::Table = raw.parse().map_err(|e| {
                LogicError::ModuleRoot(format!("{}: {e}", manifest_path.display()))
            })?;
            if manifest.contains_key("package") {
                return Ok(Self {
                    dir: dir.to_path_buf(),
                    manifest,
                });
            }
        }

        Err(LogicError::ModuleRoot(format!(
            "no Cargo.toml with a [package] above {}",
            start.display()
        )))
    }

    /// `[dependencies]` of the root, with relative path dependencies
    /// rewritten against the root directory. `trellis-sdk` (from `sdk`)
    /// and `serde_json` are added when the root does not declare them.
    fn dependencies(&self, sdk: &Path) -> toml::Table {
        let mut deps = self
            .manifest
            .get("dependencies")
            .and_then(toml::Value::as_table)
            .cloned()
            .unwrap_or_default();

        for (_, spec) in deps.iter_mut() {
            let Some(path) = spec
                .as_table_mut()
                .and_then(|t| t.get_mut("path"))
            else {
                continue;
            };
            if let Some(rel) = path.as_str().filter(|p| Path::new(p).is_relative()) {
                let abs = self.dir.join(rel);
                *path = toml::Value::String(abs.to_string_lossy().into_owned());
            }
        }

        deps.entry("serde_json")
            .or_insert_with(|| toml::Value::String("1".to_string()));
        deps.entry(SDK_CRATE).or_insert_with(|| {
            let mut spec = toml::Table::new();
            spec.insert(
                "path".into(),
                toml::Value::String(sdk.to_string_lossy().into_owned()),
            );
            toml::Value::Table(spec)
        });
        deps
    }
}

/// Source files of one synthesized runner project.
#[derive(Debug, Clone)]
pub struct RunnerSource {
    pub manifest: String,
    pub main: String,
}

/// Build the runner project for `handler` (an absolute path inside
/// `module`). `sdk` locates `trellis-sdk` if the module does not.
pub fn synthesize(
    module: &ModuleRoot,
    handler: &Path,
    ctx: &ExecContext,
    sdk: &Path,
) -> Result<RunnerSource, LogicError> {
    let relative = handler.strip_prefix(&module.dir).unwrap_or(handler);
    let context_json = serde_json::to_string(ctx).map_err(LogicError::Decode)?;

    let mut env = Environment::new();
    env.add_template("main.rs", MAIN_TEMPLATE)
        .map_err(LogicError::Runner)?;
    let main = env
        .get_template("main.rs")
        .and_then(|t| {
            t.render(context! {
                relative => relative.to_string_lossy(),
                handler => format!("{:?}", handler.to_string_lossy()),
                context => format!("{context_json:?}"),
                sentinel => NOT_FOUND_SENTINEL,
                exit_code => NOT_FOUND_EXIT_CODE,
            })
        })
        .map_err(LogicError::Runner)?;

    Ok(RunnerSource {
        manifest: manifest(module, sdk)?,
        main,
    })
}

fn manifest(module: &ModuleRoot, sdk: &Path) -> Result<String, LogicError> {
    let mut package = toml::Table::new();
    package.insert("name".into(), "trellis-runner".into());
    package.insert("version".into(), "0.0.0".into());
    package.insert("edition".into(), "2021".into());
    package.insert("publish".into(), false.into());

    let mut bin = toml::Table::new();
    bin.insert("name".into(), "trellis-runner".into());
    bin.insert("path".into(), "main.rs".into());

    let mut doc = toml::Table::new();
    doc.insert("package".into(), package.into());
    doc.insert("bin".into(), toml::Value::Array(vec![bin.into()]));
    doc.insert("dependencies".into(), module.dependencies(sdk).into());
    // Keeps the runner out of any enclosing workspace.
    doc.insert("workspace".into(), toml::Table::new().into());

    toml::to_string(&doc).map_err(LogicError::Manifest)
}
