//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use trellis::config::{Environment, SiteConfig};
use trellis::lifecycle::{build_server, Shutdown};

/// A site tree in a temporary directory. The root is also a crate root,
/// so logic units resolve their module root to it.
pub struct TestSite {
    dir: tempfile::TempDir,
}

impl TestSite {
    pub fn new() -> Self {
        let site = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        site.write("Cargo.toml", "[package]\nname = \"site\"\nversion = \"0.1.0\"\n");
        site
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> &Self {
        let path = self.path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
        self
    }

    /// Production-mode config rooted at the site, caching into `cache/`.
    /// Logic units run through `sh -c <script>`.
    pub fn config(&self) -> SiteConfig {
        let mut config = SiteConfig::default();
        config.listener.bind_address = "127.0.0.1:0".to_string();
        config.site.root = self.root().to_path_buf();
        config.site.env = Environment::Prod;
        config.cache.output_dir = self.path("cache");
        config.executor.formatter = None;
        config.executor.toolchain = vec!["sh".into(), "-c".into(), "echo '{}'".into()];
        config
    }
}

/// Point the logic toolchain at a shell script. `{source}` expands to the
/// synthesized runner source.
pub fn with_script(mut config: SiteConfig, script: &str) -> SiteConfig {
    config.executor.toolchain = vec!["sh".into(), "-c".into(), script.into()];
    config
}

/// A running server bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestServer {
    pub async fn start(config: SiteConfig) -> Self {
        let shutdown = Shutdown::new();
        let server = build_server(config, &shutdown).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(server.run(listener, shutdown.clone()));
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        client().get(self.url(path)).send().await.unwrap()
    }

    /// Trigger shutdown and wait for the server, including the cache
    /// write-back drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// A client without automatic decompression or connection reuse.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// Poll until `path` exists or the timeout elapses.
pub async fn wait_for_file(path: &Path) -> bool {
    for _ in 0..200 {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
