//! Trellis: a file-system-driven web rendering server.
//!
//! A request is matched against routes discovered from a directory tree,
//! runs the route's logic unit, renders the result through a composed
//! layout/page/fragment template set and is answered, optionally from and
//! into a disk-backed output cache with HTTP validation.

pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod locks;
pub mod logic;
pub mod observability;
pub mod render;
pub mod routing;
pub mod site;

pub use config::schema::SiteConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use site::Site;
