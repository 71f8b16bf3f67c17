//! Site tree watcher for route hot reload.
//!
//! # Responsibilities
//! - Watch the page, fragment and asset trees recursively
//! - Coalesce bursts of filesystem events into one rebuild
//!
//! # Design Decisions
//! - notify delivers events on its own thread; they are forwarded into a
//!   tokio channel and debounced by a single consumer
//! - The debounce is a resettable deadline, not a queue: any number of
//!   events inside the window costs one rebuild
//! - Access events are ignored, everything else counts as a change

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

/// Watches a set of directories and calls back after a quiet window.
pub struct SiteWatcher {
    paths: Vec<PathBuf>,
    debounce: Duration,
}

impl SiteWatcher {
    pub fn new(paths: Vec<PathBuf>, debounce: Duration) -> Self {
        Self { paths, debounce }
    }

    /// Start watching. `on_change` runs on the tokio runtime once per
    /// debounced burst, until `shutdown` fires.
    pub fn spawn<F>(
        self,
        on_change: F,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<tokio::task::JoinHandle<()>, notify::Error>
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if is_change(&event.kind) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default(),
        )?;

        for path in &self.paths {
            if Path::new(path).exists() {
                watcher.watch(path, RecursiveMode::Recursive)?;
            } else {
                tracing::debug!(path = %path.display(), "Not watching missing directory");
            }
        }

        tracing::info!(paths = ?self.paths, debounce = ?self.debounce, "Site watcher started");

        let debounce = self.debounce;
        Ok(tokio::spawn(async move {
            // The watcher stops when dropped, so it lives as long as the loop.
            let _watcher = watcher;
            debounce_loop(rx, debounce, on_change, shutdown).await;
            tracing::info!("Site watcher stopped");
        }))
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

/// Call `on_change` once after each burst of events has been quiet for
/// `window`.
pub(crate) async fn debounce_loop<F>(
    mut events: mpsc::UnboundedReceiver<()>,
    window: Duration,
    on_change: F,
    mut shutdown: broadcast::Receiver<()>,
) where
    F: Fn(),
{
    let mut deadline: Option<Instant> = None;

    loop {
        let fire_at = deadline;
        tokio::select! {
            event = events.recv() => match event {
                Some(()) => deadline = Some(Instant::now() + window),
                None => break,
            },
            _ = async move {
                match fire_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                deadline = None;
                on_change();
            }
            _ = shutdown.recv() => break,
        }
    }
}
