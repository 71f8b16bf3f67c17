//! Response construction.
//!
//! # Responsibilities
//! - Assemble page responses with validation and encoding headers
//! - Produce the bare status-line and JSON error bodies
//!
//! # Design Decisions
//! - The debug cache header is opt-in and carries HIT or MISS only
//! - `Vary: Accept-Encoding` is sent whenever the cache may answer with
//!   either twin

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::render::PageKind;

/// Debug header reporting whether the output cache answered.
pub const CACHE_STATUS_HEADER: &str = "x-trellis-cache";

/// Whether a page came from the output cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// A successful page response.
#[derive(Debug)]
pub struct PageResponse {
    pub body: Vec<u8>,
    pub kind: PageKind,
    pub etag: String,
    pub gzip: bool,
    pub vary: bool,
    /// Set only when debug headers are enabled.
    pub cache_status: Option<CacheStatus>,
}

impl IntoResponse for PageResponse {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::OK, self.body).into_response();
        let headers = response.headers_mut();

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.kind.content_type()),
        );
        if let Ok(etag) = HeaderValue::from_str(&self.etag) {
            headers.insert(header::ETAG, etag);
        }
        if self.gzip {
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        if self.vary {
            headers.insert(header::VARY, HeaderValue::from_static("accept-encoding"));
        }
        if let Some(status) = self.cache_status {
            headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status.as_str()));
        }
        response
    }
}

/// A rendered error page with its status.
pub fn error_page(status: StatusCode, body: Vec<u8>, kind: PageKind) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, kind.content_type())],
        body,
    )
        .into_response()
}

/// The last-resort error body: `"<status> - <message>"`.
pub fn bare_error(status: StatusCode, message: &str) -> Response {
    (status, format!("{} - {message}", status.as_u16())).into_response()
}

/// A JSON error body for API routes.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// True if an `If-None-Match` value matches `etag`.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == etag || candidate == "*")
}

/// True if the client accepts a gzip body.
pub fn accepts_gzip(accept_encoding: Option<&HeaderValue>) -> bool {
    accept_encoding
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_response_headers() {
        let response = PageResponse {
            body: b"<p>hi</p>".to_vec(),
            kind: PageKind::Html,
            etag: "W/\"0011223344556677\"".to_string(),
            gzip: true,
            vary: true,
            cache_status: Some(CacheStatus::Hit),
        }
        .into_response();

        let headers = response.headers();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/html; charset=utf-8");
        assert_eq!(headers[header::ETAG], "W/\"0011223344556677\"");
        assert_eq!(headers[header::CONTENT_ENCODING], "gzip");
        assert_eq!(headers[header::VARY], "accept-encoding");
        assert_eq!(headers[CACHE_STATUS_HEADER], "HIT");
    }

    #[test]
    fn test_plain_page_response_omits_optional_headers() {
        let response = PageResponse {
            body: b"<rss/>".to_vec(),
            kind: PageKind::Xml,
            etag: "W/\"aa\"".to_string(),
            gzip: false,
            vary: false,
            cache_status: None,
        }
        .into_response();

        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/xml");
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert!(headers.get(CACHE_STATUS_HEADER).is_none());
    }

    #[test]
    fn test_etag_matching() {
        let tag = "W/\"abc\"";
        assert!(etag_matches("W/\"abc\"", tag));
        assert!(etag_matches("W/\"zzz\", W/\"abc\"", tag));
        assert!(etag_matches("*", tag));
        assert!(!etag_matches("W/\"abd\"", tag));
    }

    #[test]
    fn test_accepts_gzip() {
        assert!(accepts_gzip(Some(&HeaderValue::from_static("gzip, deflate, br"))));
        assert!(!accepts_gzip(Some(&HeaderValue::from_static("br"))));
        assert!(!accepts_gzip(None));
    }
}
