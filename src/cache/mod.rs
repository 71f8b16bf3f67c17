//! Output cache subsystem.
//!
//! # Data Flow
//! ```text
//! Request (route key, Accept-Encoding, If-None-Match)
//!     → store.rs (raw entry decides hit and ETag; gzip twin body if accepted)
//!     → ETag compare → 304 | cached bytes | miss
//!
//! Render miss
//!     → response sent with fresh ETag
//!     → writer.rs (bounded queue, per-key lock)
//!     → store.rs (raw + gzip twin, replaced atomically)
//! ```

pub mod store;
pub mod writer;

pub use store::{
    etag, is_cacheable_key, route_key, CacheError, CachedPage, Encoding, OutputCache,
};
pub use writer::{CacheWrite, WriteBack};
