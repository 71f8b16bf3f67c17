//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup and on every debounced change):
//!     routes/ and api/ directory trees
//!     → router.rs (one route per directory holding a page or handler)
//!     → matcher.rs (segments → anchored pattern + param names)
//!     → Sort static before dynamic
//!     → Freeze as immutable RouteTable, swapped in whole
//!
//! Incoming Request (normalized path)
//!     → router.rs (linear scan, first match)
//!     → Return: matched Route + Params, or NoMatch (404)
//! ```
//!
//! # Design Decisions
//! - Tables are immutable; readers never see a partial rebuild
//! - Deterministic: directory walk is sorted, so the same tree always
//!   yields the same order

pub mod matcher;
pub mod router;
pub mod watcher;

pub use matcher::{Params, RoutePattern};
pub use router::{ApiRoute, Route, RouteMatch, RouteTable, RoutingError};
pub use watcher::SiteWatcher;
