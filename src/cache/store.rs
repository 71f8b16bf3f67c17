//! Disk-backed output cache.
//!
//! Layout: `<output_dir>/<route_key>/index.<ext>` plus the gzip twin
//! `index.<ext>.gz`. The filesystem is the source of truth; nothing is
//! held in memory between requests.

use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use flate2::{write::GzEncoder, Compression};
use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from persisting a cache entry.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create cache directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compress entry: {0}")]
    Compress(#[source] std::io::Error),
}

/// Which twin of an entry to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
}

/// Normalize a request path into a route key (`/posts/42/` → `posts/42`).
///
/// Percent-escapes are decoded first, so `/posts/hello%20world` keys as
/// `posts/hello world`. Invalid UTF-8 is replaced rather than rejected.
pub fn route_key(path: &str) -> String {
    percent_decode_str(path)
        .decode_utf8_lossy()
        .trim_matches('/')
        .to_string()
}

/// True if `key` maps to a directory inside the output dir.
pub fn is_cacheable_key(key: &str) -> bool {
    Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

/// Weak ETag over the first 8 bytes of the SHA-256 of `data`.
pub fn etag(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("W/\"{}\"", hex::encode(&digest[..8]))
}

/// A cache hit ready to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    pub body: Vec<u8>,
    /// `body` is the gzip twin.
    pub gzip: bool,
    /// ETag of the uncompressed entry, shared by both twins.
    pub etag: String,
}

/// The on-disk output cache.
#[derive(Debug, Clone)]
pub struct OutputCache {
    output_dir: PathBuf,
}

impl OutputCache {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the uncompressed entry.
    pub fn entry_path(&self, key: &str, ext: &str) -> PathBuf {
        self.output_dir.join(key).join(format!("index.{ext}"))
    }

    /// Path of the gzip twin.
    pub fn gzip_path(&self, key: &str, ext: &str) -> PathBuf {
        self.output_dir.join(key).join(format!("index.{ext}.gz"))
    }

    /// Read one twin. A missing file is `Ok(None)`.
    pub async fn read(
        &self,
        key: &str,
        ext: &str,
        encoding: Encoding,
    ) -> std::io::Result<Option<Vec<u8>>> {
        let path = match encoding {
            Encoding::Identity => self.entry_path(key, ext),
            Encoding::Gzip => self.gzip_path(key, ext),
        };
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Look up `key` for serving.
    ///
    /// The uncompressed entry decides whether there is a hit and what the
    /// ETag is. The gzip twin only replaces the body when `gzip_ok` and it
    /// exists, so a validator issued on any response matches every later one.
    pub async fn lookup(
        &self,
        key: &str,
        ext: &str,
        gzip_ok: bool,
    ) -> std::io::Result<Option<CachedPage>> {
        let Some(raw) = self.read(key, ext, Encoding::Identity).await? else {
            return Ok(None);
        };
        let etag = etag(&raw);
        if gzip_ok {
            if let Some(body) = self.read(key, ext, Encoding::Gzip).await? {
                return Ok(Some(CachedPage {
                    body,
                    gzip: true,
                    etag,
                }));
            }
        }
        Ok(Some(CachedPage {
            body: raw,
            gzip: false,
            etag,
        }))
    }

    /// Write both twins, replacing any previous entry.
    ///
    /// Each file is written to a temporary sibling and renamed into place,
    /// so concurrent readers see either the old or the new bytes.
    pub async fn save(&self, key: &str, ext: &str, body: &[u8]) -> Result<(), CacheError> {
        let dir = self.output_dir.join(key);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| CacheError::CreateDir {
                path: dir.clone(),
                source,
            })?;

        let compressed = gzip(body).map_err(CacheError::Compress)?;

        replace_file(&self.entry_path(key, ext), body).await?;
        replace_file(&self.gzip_path(key, ext), &compressed).await?;
        Ok(())
    }
}

fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

async fn replace_file(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let write_err = |source| CacheError::Write {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp, data).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)
}
