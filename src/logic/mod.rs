//! Logic execution engine.
//!
//! # Data Flow
//! ```text
//! logic unit path + ExecContext
//!     → executor.rs
//!         → plugin.rs (native artifact next to the source?)
//!             present → load once, call in-process → result
//!             absent  → fall through
//!         → per-unit compile lock
//!         → subprocess.rs (synthesize runner, format, compile-and-run)
//!     → LogicData (JSON object) | LogicError
//! ```
//!
//! # Design Decisions
//! - Both strategies speak the same JSON shapes, so a unit behaves the
//!   same whichever way it runs
//! - Not-found travels on a structured channel (exit code, envelope flag);
//!   the stderr sentinel is still honoured
//! - Isolation is for fault containment, not a security boundary

pub mod executor;
pub mod plugin;
pub mod runner;
pub mod subprocess;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::{header, request::Parts};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::Params;

pub use executor::Executor;
pub use plugin::PluginCache;
pub use subprocess::SubprocessRunner;

/// What a logic unit returns: a JSON object handed to the templates.
pub type LogicData = serde_json::Map<String, serde_json::Value>;

/// Exit code a runner uses to report "resource not found".
pub const NOT_FOUND_EXIT_CODE: i32 = 44;

/// Diagnostic line that also signals "resource not found".
pub const NOT_FOUND_SENTINEL: &str = "logic-error: not found";

/// Everything a logic unit may know about the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecContext {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
    pub host: String,
    pub remote_addr: String,
    /// Query parameters merged with an urlencoded body.
    pub form: BTreeMap<String, Vec<String>>,
    pub params: Params,
}

impl ExecContext {
    /// Capture a request. The body is decoded lossily as UTF-8.
    pub fn from_parts(
        parts: &Parts,
        body: &[u8],
        remote_addr: Option<SocketAddr>,
        params: Params,
    ) -> Self {
        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &parts.headers {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        let mut form: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(query) = parts.uri.query() {
            collect_pairs(&mut form, query.as_bytes());
        }
        let urlencoded = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if urlencoded {
            collect_pairs(&mut form, body);
        }

        Self {
            method: parts.method.to_string(),
            url: parts.uri.to_string(),
            headers,
            body: String::from_utf8_lossy(body).into_owned(),
            host,
            remote_addr: remote_addr.map(|a| a.to_string()).unwrap_or_default(),
            form,
            params,
        }
    }
}

fn collect_pairs(form: &mut BTreeMap<String, Vec<String>>, input: &[u8]) {
    for (k, v) in url::form_urlencoded::parse(input) {
        form.entry(k.into_owned()).or_default().push(v.into_owned());
    }
}

/// Errors from running a logic unit.
#[derive(Debug, Error)]
pub enum LogicError {
    /// The unit reported that the requested resource does not exist.
    #[error("not found")]
    NotFound,

    #[error("invalid plugin {}: {reason}", path.display())]
    InvalidPlugin { path: PathBuf, reason: String },

    #[error("failed to load plugin {}: {source}", path.display())]
    PluginLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("plugin {} panicked", path.display())]
    PluginPanicked { path: PathBuf },

    #[error("could not resolve module root: {0}")]
    ModuleRoot(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("runner synthesis failed: {0}")]
    Runner(#[source] minijinja::Error),

    #[error("runner manifest could not be written: {0}")]
    Manifest(#[source] toml::ser::Error),

    #[error("exec error: {status}\nstderr: {stderr}")]
    Exec { status: String, stderr: String },

    #[error("json decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

impl LogicError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LogicError::NotFound)
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LogicError::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_context_captures_request() {
        let (parts, ()) = Request::builder()
            .method("POST")
            .uri("/search?q=rust&tag=a&tag=b")
            .header("host", "example.com")
            .header("content-type", "application/x-www-form-urlencoded")
            .header("x-multi", "1")
            .header("x-multi", "2")
            .body(())
            .unwrap()
            .into_parts();

        let mut params = Params::new();
        params.insert("id".into(), "42".into());
        let remote: SocketAddr = "10.0.0.1:5000".parse().unwrap();

        let ctx = ExecContext::from_parts(&parts, b"page=2&q=more", Some(remote), params);

        assert_eq!(ctx.method, "POST");
        assert_eq!(ctx.url, "/search?q=rust&tag=a&tag=b");
        assert_eq!(ctx.host, "example.com");
        assert_eq!(ctx.remote_addr, "10.0.0.1:5000");
        assert_eq!(ctx.body, "page=2&q=more");
        assert_eq!(ctx.headers["x-multi"], ["1", "2"]);
        assert_eq!(ctx.form["q"], ["rust", "more"]);
        assert_eq!(ctx.form["tag"], ["a", "b"]);
        assert_eq!(ctx.form["page"], ["2"]);
        assert_eq!(ctx.params["id"], "42");
    }

    #[test]
    fn test_plain_body_is_not_form_parsed() {
        let (parts, ()) = Request::builder()
            .method("POST")
            .uri("/x")
            .header("content-type", "application/json")
            .body(())
            .unwrap()
            .into_parts();

        let ctx = ExecContext::from_parts(&parts, br#"{"a":1}"#, None, Params::new());
        assert!(ctx.form.is_empty());
        assert_eq!(ctx.remote_addr, "");
    }
}
