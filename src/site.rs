//! The per-site state shared by every request.
//!
//! # Responsibilities
//! - Own the route table, renderer, executor, output cache and write-back
//!   worker of one site
//! - Rebuild and swap the route table on demand, then notify listeners
//! - Drain pending cache writes at shutdown
//!
//! # Design Decisions
//! - Everything process-wide lives here, so several sites (or test
//!   servers) can run in one process
//! - The route table sits behind `ArcSwap`: a request keeps the table it
//!   started with, and a reload never exposes a half-built one

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tokio::task::JoinHandle;

use crate::cache::{OutputCache, WriteBack};
use crate::config::SiteConfig;
use crate::lifecycle::Shutdown;
use crate::logic::Executor;
use crate::observability::metrics;
use crate::render::Renderer;
use crate::routing::{RouteTable, RoutingError};

type ReloadHook = Box<dyn Fn() + Send + Sync>;

/// One served site.
pub struct Site {
    config: SiteConfig,
    routes: ArcSwap<RouteTable>,
    renderer: Arc<Renderer>,
    executor: Executor,
    store: Arc<OutputCache>,
    writer: Option<WriteBack>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    on_reload: Option<ReloadHook>,
}

impl Site {
    /// Build the site and start its write-back worker (when caching is
    /// enabled). The worker stops when `shutdown` fires.
    pub fn new(config: SiteConfig, shutdown: &Shutdown) -> Result<Self, RoutingError> {
        let routes = RouteTable::load(&config.site)?;
        tracing::info!(
            routes = routes.routes().len(),
            api_routes = routes.api_routes().len(),
            components = routes.components().len(),
            root = %config.site.root.display(),
            "Routes loaded"
        );

        let renderer = Arc::new(Renderer::new(
            config.site.root.clone(),
            config.site.components_path(),
            config.site.env,
        ));
        let executor = Executor::new(&config.executor);
        let store = Arc::new(OutputCache::new(config.cache.output_dir.clone()));

        let (writer, writer_task) = if config.cache.enabled {
            let (writer, task) = WriteBack::spawn(
                store.clone(),
                config.cache.queue_capacity,
                config.debug.logs,
                shutdown.subscribe(),
            );
            (Some(writer), Some(task))
        } else {
            (None, None)
        };

        Ok(Self {
            config,
            routes: ArcSwap::from_pointee(routes),
            renderer,
            executor,
            store,
            writer,
            writer_task: Mutex::new(writer_task),
            on_reload: None,
        })
    }

    /// Register the callback run after every successful route reload.
    pub fn on_reload<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_reload = Some(Box::new(hook));
        self
    }

    /// Rebuild the route table from disk and swap it in.
    ///
    /// On failure the previous table stays in service.
    pub fn reload_routes(&self) -> Result<(), RoutingError> {
        let table = RouteTable::load(&self.config.site)?;
        let count = table.routes().len();
        self.routes.store(Arc::new(table));
        self.renderer.invalidate_layouts();
        metrics::record_route_reload(count);
        tracing::info!(routes = count, "Change detected and reloaded");

        if let Some(hook) = &self.on_reload {
            hook();
        }
        Ok(())
    }

    /// The current route table.
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.load_full()
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Shared so renders can move onto the blocking pool.
    pub fn renderer(&self) -> &Arc<Renderer> {
        &self.renderer
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn store(&self) -> &OutputCache {
        &self.store
    }

    /// The write-back handle; `None` when caching is disabled.
    pub fn writer(&self) -> Option<&WriteBack> {
        self.writer.as_ref()
    }

    pub fn cache_enabled(&self) -> bool {
        self.config.cache.enabled
    }

    /// Directory holding `<status>.html` and `index.html` error pages.
    pub fn error_dir(&self) -> PathBuf {
        self.config
            .site
            .routes_path()
            .join(crate::routing::router::ERROR_DIR_PREFIX)
    }

    /// Trees whose changes trigger a route reload.
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        vec![
            self.config.site.routes_path(),
            self.config.site.components_path(),
            self.config.site.api_path(),
            self.config.site.public_path(),
        ]
    }

    /// Wait for the write-back worker to finish. Call after shutdown has
    /// been triggered.
    pub async fn drain(&self) {
        let task = self
            .writer_task
            .lock()
            .map(|mut guard| guard.take())
            .unwrap_or_default();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Cache write-back worker failed");
            }
            tracing::info!("Cache write-back drained");
        }
    }
}
