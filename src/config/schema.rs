//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a site.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for a site.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SiteConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Site layout on disk and run mode.
    pub site: LayoutConfig,

    /// Output cache settings.
    pub cache: CacheConfig,

    /// Developer-facing debug switches.
    pub debug: DebugConfig,

    /// Logic unit execution settings.
    pub executor: ExecutorConfig,

    /// File watching for route reloads.
    pub watch: WatchConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Run mode. Development enables live reload and the access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

impl Environment {
    pub fn is_dev(self) -> bool {
        self == Environment::Dev
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!("unknown environment '{other}' (expected dev or prod)")),
        }
    }
}

/// Where the site's sources live.
///
/// Directory names are resolved against `root`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Site root; every other directory is relative to it.
    pub root: PathBuf,

    /// Page tree (one directory per route).
    pub routes_dir: String,

    /// Shared template fragments.
    pub components_dir: String,

    /// API handler tree.
    pub api_dir: String,

    /// Static assets served under `/static/`.
    pub public_dir: String,

    /// Run mode.
    pub env: Environment,
}

impl LayoutConfig {
    pub fn routes_path(&self) -> PathBuf {
        self.root.join(&self.routes_dir)
    }

    pub fn components_path(&self) -> PathBuf {
        self.root.join(&self.components_dir)
    }

    pub fn api_path(&self) -> PathBuf {
        self.root.join(&self.api_dir)
    }

    pub fn public_path(&self) -> PathBuf {
        self.root.join(&self.public_dir)
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            routes_dir: "routes".to_string(),
            components_dir: "components".to_string(),
            api_dir: "api".to_string(),
            public_dir: "public".to_string(),
            env: Environment::Dev,
        }
    }
}

/// Output cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve from and write to the disk cache.
    pub enabled: bool,

    /// Directory holding `<route_key>/index.<ext>` and its `.gz` twin.
    pub output_dir: PathBuf,

    /// Bounded write-back queue size. A full queue falls back to an
    /// immediate detached write.
    pub queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: PathBuf::from("./cache"),
            queue_capacity: 100,
        }
    }
}

/// Debug switches.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DebugConfig {
    /// Emit `X-Trellis-Cache: HIT|MISS`.
    pub headers: bool,

    /// Log cache hits, 304s and write-back activity.
    pub logs: bool,
}

/// Logic unit execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Scratch directory name, created under the module root.
    pub scratch_dir: String,

    /// Command that compiles and runs a synthesized runner.
    /// `{manifest}`, `{source}` and `{dir}` are substituted per run.
    pub toolchain: Vec<String>,

    /// Best-effort formatter applied to the runner source before it runs.
    /// `{source}` is substituted.
    pub formatter: Option<Vec<String>>,

    /// Location of the `trellis-sdk` crate, used when the module root does
    /// not declare the dependency itself.
    pub sdk_path: PathBuf,
}

/// The SDK shipped alongside this server build.
pub const BUNDLED_SDK_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/sdk/rust");

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            scratch_dir: ".trellis-tmp".to_string(),
            toolchain: ["cargo", "run", "--quiet", "--manifest-path", "{manifest}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            formatter: Some(
                ["rustfmt", "--edition", "2021", "{source}"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            sdk_path: PathBuf::from(BUNDLED_SDK_PATH),
        }
    }
}

/// File watching configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Rebuild routes when the site tree changes.
    pub enabled: bool,

    /// Quiet window before a burst of events triggers one rebuild.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: 100,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body handed to a logic unit, in bytes.
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: SiteConfig = toml::from_str(
            r#"
            [cache]
            enabled = true

            [site]
            env = "prod"
            "#,
        )
        .unwrap();

        assert!(config.cache.enabled);
        assert_eq!(config.cache.output_dir, PathBuf::from("./cache"));
        assert_eq!(config.cache.queue_capacity, 100);
        assert_eq!(config.site.env, Environment::Prod);
        assert_eq!(config.site.routes_dir, "routes");
        assert_eq!(config.watch.debounce_ms, 100);
        assert!(config.executor.sdk_path.ends_with("sdk/rust"));
    }

    #[test]
    fn test_environment_from_str() {
        assert_eq!("prod".parse::<Environment>(), Ok(Environment::Prod));
        assert_eq!("development".parse::<Environment>(), Ok(Environment::Dev));
        assert!("staging".parse::<Environment>().is_err());
    }
}
