//! Trellis server binary.
//!
//! ```text
//! trellis.toml ──▶ config ──▶ CLI overrides ──▶ logging ──▶ lifecycle::start
//!                                                             │
//!                     ┌───────────────────────────────────────┘
//!                     ▼
//!     Request ──▶ http (middleware) ──▶ dispatch ──▶ routing
//!                                          │            │
//!                                          ▼            ▼
//!                                        cache ◀──── render ◀── logic
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use trellis::config::{load_or_default, Environment, SiteConfig};
use trellis::lifecycle;
use trellis::observability::init_logging;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Serve a file-system-driven site", long_about = None)]
struct Cli {
    /// Configuration file. A missing file means defaults.
    #[arg(short, long, default_value = "trellis.toml")]
    config: PathBuf,

    /// Run mode: dev or prod.
    #[arg(short, long)]
    env: Option<Environment>,

    /// Port to listen on, keeping the configured host.
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable or disable the output cache.
    #[arg(long)]
    cache: Option<bool>,

    /// Enable or disable route hot reload.
    #[arg(long)]
    watch: Option<bool>,
}

impl Cli {
    fn apply(&self, config: &mut SiteConfig) {
        if let Some(env) = self.env {
            config.site.env = env;
        }
        if let Some(port) = self.port {
            config.listener.bind_address = with_port(&config.listener.bind_address, port);
        }
        if let Some(cache) = self.cache {
            config.cache.enabled = cache;
        }
        if let Some(watch) = self.watch {
            config.watch.enabled = watch;
        }
    }
}

fn with_port(bind_address: &str, port: u16) -> String {
    let host = bind_address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(bind_address);
    format!("{host}:{port}")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("trellis: {e}");
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);

    init_logging(&config.observability.log_level, config.site.env);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        env = ?config.site.env,
        bind_address = %config.listener.bind_address,
        cache = config.cache.enabled,
        watch = config.watch.enabled,
        "trellis starting"
    );

    match lifecycle::start(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "trellis failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_override_keeps_host() {
        assert_eq!(with_port("127.0.0.1:8080", 3000), "127.0.0.1:3000");
        assert_eq!(with_port("[::1]:8080", 3000), "[::1]:3000");
        assert_eq!(with_port("localhost", 3000), "localhost:3000");
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from(["trellis", "--env", "prod", "--port", "9000", "--cache", "true"]);
        let mut config = SiteConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.site.env, Environment::Prod);
        assert!(config.listener.bind_address.ends_with(":9000"));
        assert!(config.cache.enabled);
        assert!(!config.watch.enabled);
    }
}
