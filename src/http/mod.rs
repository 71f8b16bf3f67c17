//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, static assets, reload socket)
//!     → request.rs (request ID, access log, body buffering)
//!     → dispatch.rs (route table, output cache, logic, render)
//!     → response.rs (page headers, error bodies)
//!     → Send to client
//! ```

pub mod dispatch;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use response::{CacheStatus, CACHE_STATUS_HEADER};
pub use server::{AppState, HttpServer};
pub use websocket::LiveReload;
