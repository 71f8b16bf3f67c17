//! Request dispatch: the site's router.
//!
//! # Data Flow
//! ```text
//! Request path
//!     → normalize to a route key
//!     → under api/ ?
//!         yes → API table → logic unit → JSON
//!         no  → page table (no match → 404 error page)
//!               → output cache (ETag of the raw entry; gzip twin if accepted;
//!                 If-None-Match → 304)
//!               → miss: logic unit → render → respond → enqueue cache write
//! Errors anywhere → error-page chain → bare "<status> - <message>"
//! ```
//!
//! # Design Decisions
//! - The route table is loaded once per request, so a concurrent reload
//!   never changes routes mid-request
//! - The response is produced before the cache write is persisted
//! - Route keys that could escape the output directory are rendered but
//!   never cached
//! - Template execution is synchronous and runs on the blocking pool

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::Request,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::cache::{etag, is_cacheable_key, route_key, CacheWrite};
use crate::http::request::{read_body, remote_addr, request_id};
use crate::http::response::{
    accepts_gzip, bare_error, error_page, etag_matches, json_error, CacheStatus, PageResponse,
};
use crate::logic::{ExecContext, LogicData, LogicError};
use crate::observability::metrics;
use crate::render::{ErrorContext, PageKind, RenderError, Rendered};
use crate::routing::{Params, RouteTable};
use crate::site::Site;

const NOT_FOUND_MESSAGE: &str = "Page not found";

/// Serve one request against `site`.
pub async fn dispatch(site: &Site, request: Request) -> Response {
    let key = route_key(request.uri().path());
    let table = site.routes();

    if let Some(api_path) = api_path(&key, &site.config().site.api_dir) {
        return serve_api(site, &table, api_path, request).await;
    }
    serve_page(site, &table, &key, request).await
}

fn api_path<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)?.strip_prefix('/')
}

async fn serve_api(site: &Site, table: &RouteTable, api_path: &str, request: Request) -> Response {
    let Some(matched) = table.match_api(api_path) else {
        return json_error(StatusCode::NOT_FOUND, "API route not found");
    };
    let logic = matched.route.logic.clone();

    let data = match run_logic(site, &logic, matched.params, request).await {
        Ok(data) => data,
        Err(Ok(e)) if e.is_not_found() => return json_error(StatusCode::NOT_FOUND, "Not Found"),
        Err(Ok(e)) => {
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Server error: {e}"))
        }
        Err(Err(rejection)) => return rejection,
    };
    Json(data).into_response()
}

async fn serve_page(site: &Site, table: &Arc<RouteTable>, key: &str, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let Some(matched) = table.match_page(key) else {
        return render_error(site, table, StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE, &path).await;
    };
    let template = matched.route.template.clone();
    let logic = matched.route.logic.clone();
    let kind = PageKind::from_path(&template);
    let cacheable = site.cache_enabled() && is_cacheable_key(key);

    if cacheable {
        let headers = request.headers();
        let gzip_ok = accepts_gzip(headers.get(header::ACCEPT_ENCODING));
        let if_none_match = headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(response) = serve_cached(site, key, kind, gzip_ok, if_none_match.as_deref()).await {
            return response;
        }
    }

    let data = if tokio::fs::try_exists(&logic).await.unwrap_or(false) {
        match run_logic(site, &logic, matched.params, request).await {
            Ok(data) => data,
            Err(Ok(e)) if e.is_not_found() => {
                return render_error(site, table, StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE, &path)
                    .await
            }
            Err(Ok(e)) => {
                let message = format!("Server logic error: {e}");
                return render_error(site, table, StatusCode::INTERNAL_SERVER_ERROR, &message, &path)
                    .await;
            }
            Err(Err(rejection)) => return rejection,
        }
    } else {
        LogicData::new()
    };

    let rendered = match render_page(site, table, template.clone(), data).await {
        Ok(rendered) => rendered,
        Err(e) => {
            tracing::error!(template = %template.display(), error = %e, "Page render failed");
            let message = e.to_string();
            return render_error(site, table, StatusCode::INTERNAL_SERVER_ERROR, &message, &path)
                .await;
        }
    };

    let tag = etag(&rendered.body);
    if cacheable {
        if let Some(writer) = site.writer() {
            writer.enqueue(CacheWrite {
                key: key.to_string(),
                ext: kind.ext(),
                body: rendered.body.clone(),
            });
            if site.config().debug.logs {
                tracing::debug!(key = %key, "Enqueued cache write");
            }
        }
    }

    PageResponse {
        body: rendered.body,
        kind,
        etag: tag,
        gzip: false,
        vary: site.cache_enabled(),
        cache_status: site.config().debug.headers.then_some(CacheStatus::Miss),
    }
    .into_response()
}

/// Answer from the output cache, or `None` on a full miss.
async fn serve_cached(
    site: &Site,
    key: &str,
    kind: PageKind,
    gzip_ok: bool,
    if_none_match: Option<&str>,
) -> Option<Response> {
    let debug_logs = site.config().debug.logs;
    let page = match site.store().lookup(key, kind.ext(), gzip_ok).await {
        Ok(Some(page)) => page,
        Ok(None) => {
            metrics::record_cache_lookup("miss");
            return None;
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cache read failed");
            metrics::record_cache_lookup("miss");
            return None;
        }
    };

    if if_none_match.is_some_and(|v| etag_matches(v, &page.etag)) {
        metrics::record_cache_lookup("not_modified");
        if debug_logs {
            tracing::debug!(key = %key, gzip = page.gzip, "304 Not Modified");
        }
        return Some(StatusCode::NOT_MODIFIED.into_response());
    }

    metrics::record_cache_lookup("hit");
    if debug_logs {
        tracing::debug!(key = %key, gzip = page.gzip, "Cache HIT");
    }
    Some(
        PageResponse {
            body: page.body,
            kind,
            etag: page.etag,
            gzip: page.gzip,
            vary: true,
            cache_status: site.config().debug.headers.then_some(CacheStatus::Hit),
        }
        .into_response(),
    )
}

/// Run a logic unit for `request`. The outer error is either a logic
/// failure or an early rejection (oversized body).
async fn run_logic(
    site: &Site,
    logic: &Path,
    params: Params,
    request: Request,
) -> Result<LogicData, Result<LogicError, Response>> {
    let remote = remote_addr(&request);
    let id = request_id(&request).to_string();
    let (parts, body) = request.into_parts();
    let body = read_body(body, site.config().limits.max_body_size)
        .await
        .map_err(Err)?;

    let ctx = ExecContext::from_parts(&parts, &body, remote, params);
    site.executor().execute(logic, ctx).await.map_err(|e| {
        if !e.is_not_found() {
            tracing::error!(request_id = %id, unit = %logic.display(), error = %e, "Logic unit error");
        }
        Ok(e)
    })
}

/// Render `page` on the blocking pool.
async fn render_page(
    site: &Site,
    table: &Arc<RouteTable>,
    page: PathBuf,
    data: LogicData,
) -> Result<Rendered, RenderError> {
    let renderer = site.renderer().clone();
    let table = table.clone();
    tokio::task::spawn_blocking(move || renderer.render_page(&page, table.components(), &data))
        .await
        .map_err(RenderError::Task)?
}

/// Walk the error-page chain for `status`.
async fn render_error(
    site: &Site,
    table: &Arc<RouteTable>,
    status: StatusCode,
    message: &str,
    path: &str,
) -> Response {
    let ctx = ErrorContext::new(status.as_u16(), message, path);
    let renderer = site.renderer().clone();
    let table = table.clone();
    let error_dir = site.error_dir();
    let rendered = tokio::task::spawn_blocking(move || {
        renderer.render_error(&error_dir, table.components(), &ctx)
    })
    .await
    .unwrap_or_else(|e| {
        tracing::error!(status = status.as_u16(), error = %e, "Error page render task failed");
        None
    });

    match rendered {
        Some(rendered) => error_page(status, rendered.body, rendered.kind),
        None => bare_error(status, message),
    }
}
