//! Render pipeline.
//!
//! # Data Flow
//! ```text
//! matched Route + logic data
//!     → layout.rs (directive in the page's first lines, cached per page)
//!     → templates.rs (layout + page + fragments → fingerprint → cached set)
//!     → pipeline.rs (execute entry, inject reload client in dev)
//!     → Rendered bytes + page kind
//! ```
//!
//! # Design Decisions
//! - Parse and execution failures are developer-facing 500s, never retried
//! - Compiled sets are keyed by file identity, so edits invalidate
//!   without any explicit eviction

pub mod layout;
pub mod pipeline;
pub mod templates;

pub use layout::LayoutResolver;
pub use pipeline::{ErrorContext, PageKind, Rendered, Renderer, RELOAD_PATH};
pub use templates::{RenderError, TemplateCache, TemplateFiles, TemplateSet};
