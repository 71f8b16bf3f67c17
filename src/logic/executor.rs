//! Single entry point for running logic units.
//!
//! Policy: a precompiled artifact wins; otherwise the unit is compiled and
//! run under its per-unit lock, so one unit never builds twice at once
//! while different units proceed in parallel.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::ExecutorConfig;
use crate::locks::KeyedLocks;
use crate::logic::{ExecContext, LogicData, LogicError, PluginCache, SubprocessRunner};
use crate::observability::metrics;

/// Runs logic units with the plugin-then-subprocess policy.
#[derive(Debug)]
pub struct Executor {
    plugins: PluginCache,
    subprocess: SubprocessRunner,
    locks: KeyedLocks<PathBuf>,
}

impl Executor {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            plugins: PluginCache::new(),
            subprocess: SubprocessRunner::new(config),
            locks: KeyedLocks::new(),
        }
    }

    /// Run the unit at `unit` for one request.
    pub async fn execute(&self, unit: &Path, ctx: ExecContext) -> Result<LogicData, LogicError> {
        let started = Instant::now();
        let (strategy, result) = self.dispatch(unit, &ctx).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_not_found() => "not_found",
            Err(_) => "error",
        };
        metrics::record_logic(strategy, outcome, started.elapsed());
        tracing::debug!(unit = %unit.display(), strategy, outcome, "Logic unit finished");
        result
    }

    async fn dispatch(
        &self,
        unit: &Path,
        ctx: &ExecContext,
    ) -> (&'static str, Result<LogicData, LogicError>) {
        match self.plugins.call(unit, ctx).await {
            Ok(Some(data)) => return ("plugin", Ok(data)),
            Err(e) => return ("plugin", Err(e)),
            Ok(None) => {}
        }

        let lock = self.locks.lock_for(&unit.to_path_buf());
        let _guard = lock.lock().await;
        ("subprocess", self.subprocess.run(unit, ctx).await)
    }

    /// Loaded plugin handles.
    pub fn plugins(&self) -> &PluginCache {
        &self.plugins
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn site_with_units(names: &[&str]) -> (tempfile::TempDir, Vec<PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"site\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();
        let units = names
            .iter()
            .map(|name| {
                let route = dir.path().join("routes").join(name);
                std::fs::create_dir_all(&route).unwrap();
                let unit = route.join("index.server.rs");
                std::fs::write(&unit, "").unwrap();
                unit
            })
            .collect();
        (dir, units)
    }

    fn logging_executor(log: &Path) -> Executor {
        let script = format!(
            "echo start >> {log}; sleep 0.3; echo end >> {log}; echo '{{}}'",
            log = log.display()
        );
        Executor::new(&ExecutorConfig {
            toolchain: vec!["sh".into(), "-c".into(), script],
            formatter: None,
            ..Default::default()
        })
    }

    fn log_lines(log: &Path) -> Vec<String> {
        std::fs::read_to_string(log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_unit_runs_are_serialized() {
        let (dir, units) = site_with_units(&["posts"]);
        let log = dir.path().join("runs.log");
        let executor = Arc::new(logging_executor(&log));

        let a = tokio::spawn({
            let executor = executor.clone();
            let unit = units[0].clone();
            async move { executor.execute(&unit, ExecContext::default()).await }
        });
        let b = tokio::spawn({
            let executor = executor.clone();
            let unit = units[0].clone();
            async move { executor.execute(&unit, ExecContext::default()).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(log_lines(&log), ["start", "end", "start", "end"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_different_units_overlap() {
        let (dir, units) = site_with_units(&["posts", "about"]);
        let log = dir.path().join("runs.log");
        let executor = Arc::new(logging_executor(&log));

        let a = tokio::spawn({
            let executor = executor.clone();
            let unit = units[0].clone();
            async move { executor.execute(&unit, ExecContext::default()).await }
        });
        let b = tokio::spawn({
            let executor = executor.clone();
            let unit = units[1].clone();
            async move { executor.execute(&unit, ExecContext::default()).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(log_lines(&log), ["start", "start", "end", "end"]);
    }

    #[tokio::test]
    async fn test_not_found_passes_through() {
        let (_dir, units) = site_with_units(&["gone"]);
        let executor = Executor::new(&ExecutorConfig {
            toolchain: vec!["sh".into(), "-c".into(), "exit 44".into()],
            formatter: None,
            ..Default::default()
        });

        let err = executor.execute(&units[0], ExecContext::default()).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(executor.plugins().is_empty());
    }
}
