//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, missing file = defaults)
//!     → validation.rs (semantic checks)
//!     → SiteConfig (validated, immutable)
//!     → command-line overrides applied in main
//!     → shared by value with every subsystem
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the site tree is what hot-reloads,
//!   not the config
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    CacheConfig, DebugConfig, Environment, ExecutorConfig, LayoutConfig, LimitsConfig,
    ListenerConfig, ObservabilityConfig, SiteConfig, TimeoutConfig, WatchConfig, BUNDLED_SDK_PATH,
};
