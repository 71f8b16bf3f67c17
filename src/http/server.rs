//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: static assets, live-reload endpoint, and a
//!   fallback that hands everything else to the site dispatcher
//! - Wire up middleware (request ID, tracing, access log, limits, timeout)
//! - Run the site watcher alongside the server
//! - Serve until shutdown, then drain pending cache writes

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{FromRef, Request, State},
    http::{header, HeaderName, HeaderValue},
    middleware,
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower::Layer;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::http::dispatch::dispatch;
use crate::http::request::{access_log, X_REQUEST_ID};
use crate::http::websocket::{reload_socket, LiveReload};
use crate::lifecycle::Shutdown;
use crate::render::RELOAD_PATH;
use crate::routing::SiteWatcher;
use crate::site::Site;

/// Path prefix for files from the public directory.
pub const STATIC_PREFIX: &str = "/static";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub site: Arc<Site>,
    pub live_reload: LiveReload,
}

impl FromRef<AppState> for LiveReload {
    fn from_ref(state: &AppState) -> Self {
        state.live_reload.clone()
    }
}

/// HTTP server for one site.
pub struct HttpServer {
    router: Router,
    site: Arc<Site>,
}

impl HttpServer {
    pub fn new(site: Arc<Site>, live_reload: LiveReload) -> Self {
        let state = AppState {
            site: site.clone(),
            live_reload,
        };
        let router = Self::build_router(&site, state);
        Self { router, site }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(site: &Site, state: AppState) -> Router {
        let config = site.config();
        let dev = config.site.env.is_dev();
        let request_id = HeaderName::from_static(X_REQUEST_ID);

        let assets = ServeDir::new(config.site.public_path());
        let mut router = Router::new();
        router = if dev {
            let no_store = SetResponseHeaderLayer::overriding(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store"),
            );
            router.nest_service(STATIC_PREFIX, no_store.layer(assets))
        } else {
            router.nest_service(STATIC_PREFIX, assets)
        };
        if dev {
            router = router.route(RELOAD_PATH, get(reload_socket));
        }

        router
            .fallback(site_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(RequestBodyLimitLayer::new(config.limits.max_body_size))
            .layer(middleware::from_fn_with_state(config.site.env, access_log))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                let id = request
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %id,
                )
            }))
            .layer(PropagateRequestIdLayer::new(request_id.clone()))
            .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
    }

    /// The configured router, without a listener. Useful for embedding.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.site.config();
        tracing::info!(
            address = %addr,
            env = ?config.site.env,
            cache = config.cache.enabled,
            "HTTP server starting"
        );

        let watcher = if config.watch.enabled {
            let site = self.site.clone();
            let watcher = SiteWatcher::new(
                self.site.watch_paths(),
                Duration::from_millis(config.watch.debounce_ms),
            );
            let on_change = move || {
                if let Err(e) = site.reload_routes() {
                    tracing::error!(error = %e, "Route reload failed, keeping previous table");
                }
            };
            match watcher.spawn(on_change, shutdown.subscribe()) {
                Ok(task) => Some(task),
                Err(e) => {
                    tracing::error!(error = %e, "Site watcher failed to start");
                    None
                }
            }
        } else {
            None
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await?;
        tracing::info!("HTTP server stopped");

        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }
        self.site.drain().await;
        Ok(())
    }
}

async fn site_handler(State(state): State<AppState>, request: Request) -> Response {
    dispatch(&state.site, request).await
}
