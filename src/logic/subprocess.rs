//! Compile-and-run strategy.
//!
//! # Responsibilities
//! - Synthesize a runner project in a private scratch directory
//! - Best-effort format it, then build and run it with the configured
//!   toolchain from the module root
//! - Turn exit status, stdout and stderr into a result or a [`LogicError`]
//!
//! # Design Decisions
//! - The scratch directory is removed on every path, including errors
//! - Runs share one target directory under the scratch root so dependency
//!   builds are reused between requests
//! - Callers serialize runs of the same unit; this type does no locking

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tokio::process::Command;

use crate::config::ExecutorConfig;
use crate::logic::runner::{self, ModuleRoot};
use crate::logic::{ExecContext, LogicData, LogicError, NOT_FOUND_EXIT_CODE, NOT_FOUND_SENTINEL};

const MANIFEST_FILE: &str = "Cargo.toml";
const MAIN_FILE: &str = "main.rs";
const TARGET_DIR: &str = "target";

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Runs logic units by compiling a synthesized runner.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    scratch_dir: String,
    toolchain: Vec<String>,
    formatter: Option<Vec<String>>,
    sdk_path: PathBuf,
}

impl SubprocessRunner {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            scratch_dir: config.scratch_dir.clone(),
            toolchain: config.toolchain.clone(),
            formatter: config.formatter.clone(),
            sdk_path: config.sdk_path.clone(),
        }
    }

    /// Compile and run `unit` against `ctx`.
    pub async fn run(&self, unit: &Path, ctx: &ExecContext) -> Result<LogicData, LogicError> {
        let handler = tokio::fs::canonicalize(unit)
            .await
            .map_err(|e| LogicError::io(format!("failed to resolve {}", unit.display()), e))?;
        let module = ModuleRoot::discover(&handler).await?;
        let source = runner::synthesize(&module, &handler, ctx, &self.sdk_path)?;

        let scratch_root = module.dir.join(&self.scratch_dir);
        let scratch = ScratchDir::create(&scratch_root, &handler).await?;
        scratch.write(MANIFEST_FILE, &source.manifest).await?;
        scratch.write(MAIN_FILE, &source.main).await?;

        let relative = handler.strip_prefix(&module.dir).unwrap_or(&handler);
        tracing::debug!(
            unit = %relative.display(),
            scratch = %scratch.path().display(),
            "Running logic unit"
        );

        self.format(&scratch).await;

        let output = self
            .command(&self.toolchain, &scratch)
            .current_dir(&module.dir)
            .env("CARGO_TARGET_DIR", scratch_root.join(TARGET_DIR))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LogicError::io("failed to start toolchain", e))?;

        interpret(output)
    }

    async fn format(&self, scratch: &ScratchDir) {
        let Some(formatter) = &self.formatter else {
            return;
        };
        match self.command(formatter, scratch).output().await {
            Ok(out) if out.status.success() => {}
            Ok(out) => tracing::debug!(
                status = %out.status,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "Runner formatting failed, continuing unformatted"
            ),
            Err(e) => tracing::debug!(error = %e, "Formatter unavailable, continuing unformatted"),
        }
    }

    fn command(&self, argv: &[String], scratch: &ScratchDir) -> Command {
        let expand = |arg: &String| {
            arg.replace("{manifest}", &scratch.file(MANIFEST_FILE).to_string_lossy())
                .replace("{source}", &scratch.file(MAIN_FILE).to_string_lossy())
                .replace("{dir}", &scratch.path().to_string_lossy())
        };
        let mut args = argv.iter().map(expand);
        // Validation guarantees a non-empty command.
        let mut cmd = Command::new(args.next().unwrap_or_default());
        cmd.args(args);
        cmd
    }
}

fn interpret(output: Output) -> Result<LogicData, LogicError> {
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        if output.status.code() == Some(NOT_FOUND_EXIT_CODE) || stderr.contains(NOT_FOUND_SENTINEL) {
            return Err(LogicError::NotFound);
        }
        return Err(LogicError::Exec {
            status: output.status.to_string(),
            stderr,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stdout = stdout.trim();
    if stdout.is_empty() || stdout == "null" {
        return Ok(LogicData::new());
    }
    serde_json::from_str(stdout).map_err(LogicError::Decode)
}

/// A uniquely named directory removed when dropped.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    async fn create(root: &Path, handler: &Path) -> Result<Self, LogicError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(handler.to_string_lossy().as_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(RUN_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
        let digest = hasher.finalize();

        let path = root.join(hex::encode(&digest[..8]));
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| LogicError::io(format!("failed to create {}", path.display()), e))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    async fn write(&self, name: &str, contents: &str) -> Result<(), LogicError> {
        let path = self.file(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| LogicError::io(format!("failed to write {}", path.display()), e))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    struct Site {
        dir: tempfile::TempDir,
        unit: PathBuf,
    }

    fn site() -> Site {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"site\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();
        let route = dir.path().join("routes/posts/_id");
        std::fs::create_dir_all(&route).unwrap();
        let unit = route.join("index.server.rs");
        std::fs::write(&unit, "// handler\n").unwrap();
        Site { dir, unit }
    }

    fn runner(script: &str) -> SubprocessRunner {
        SubprocessRunner::new(&ExecutorConfig {
            toolchain: vec!["sh".into(), "-c".into(), script.into()],
            formatter: None,
            ..Default::default()
        })
    }

    fn scratch_entries(site: &Site) -> Vec<String> {
        match std::fs::read_dir(site.dir.path().join(".trellis-tmp")) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|name| name != TARGET_DIR)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_stdout_becomes_result() {
        let site = site();
        let script = r#"grep -q 'mod handler;' {source} && grep -q trellis-runner {manifest} && echo '{"title":"Hello","n":3}'"#;

        let data = runner(script).run(&site.unit, &ExecContext::default()).await.unwrap();
        assert_eq!(data["title"], "Hello");
        assert_eq!(data["n"], 3);
        assert!(scratch_entries(&site).is_empty(), "scratch dir must be removed");
    }

    #[tokio::test]
    async fn test_runs_from_module_root_with_shared_target() {
        let site = site();
        let script = r#"test -f Cargo.toml && echo "{\"target\":\"$CARGO_TARGET_DIR\"}""#;

        let data = runner(script).run(&site.unit, &ExecContext::default()).await.unwrap();
        let target = data["target"].as_str().unwrap();
        assert!(target.ends_with(".trellis-tmp/target"), "{target}");
    }

    #[tokio::test]
    async fn test_exit_code_44_is_not_found() {
        let site = site();
        let err = runner("exit 44").run(&site.unit, &ExecContext::default()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_sentinel_is_not_found() {
        let site = site();
        let err = runner("echo 'logic-error: not found' >&2; exit 1")
            .run(&site.unit, &ExecContext::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let site = site();
        let err = runner("echo 'database unreachable' >&2; exit 3")
            .run(&site.unit, &ExecContext::default())
            .await
            .unwrap_err();

        match err {
            LogicError::Exec { stderr, .. } => assert!(stderr.contains("database unreachable")),
            other => panic!("expected exec error, got {other:?}"),
        }
        assert!(scratch_entries(&site).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_output_is_decode_error() {
        let site = site();
        let err = runner("echo not-json").run(&site.unit, &ExecContext::default()).await.unwrap_err();
        assert!(matches!(err, LogicError::Decode(_)));
    }

    #[tokio::test]
    async fn test_null_output_is_empty_result() {
        let site = site();
        let data = runner("echo null").run(&site.unit, &ExecContext::default()).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_formatter_failure_is_not_fatal() {
        let site = site();
        let runner = SubprocessRunner::new(&ExecutorConfig {
            toolchain: vec!["sh".into(), "-c".into(), "echo '{}'".into()],
            formatter: Some(vec!["sh".into(), "-c".into(), "exit 1".into()]),
            ..Default::default()
        });

        assert!(runner.run(&site.unit, &ExecContext::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_module_root() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("index.server.rs");
        std::fs::write(&unit, "").unwrap();

        // Only meaningful when no ancestor of the temp dir is a crate.
        let has_crate_ancestor = dir
            .path()
            .ancestors()
            .any(|a| a.join("Cargo.toml").exists());
        let result = runner("echo '{}'").run(&unit, &ExecContext::default()).await;
        if !has_crate_ancestor {
            assert!(matches!(result, Err(LogicError::ModuleRoot(_))));
        }
    }
}
