//! Precompiled logic units.
//!
//! A unit may ship a native library next to its source
//! (`index.server.so` beside `index.server.rs`). The library exports a
//! small C ABI, usually generated by `trellis_sdk::export_handler!`:
//!
//! ```text
//! trellis_abi_version() -> u32
//! trellis_handle(input, input_len, *out_len) -> *mut u8   JSON in, JSON out
//! trellis_free(ptr, len)
//! ```
//!
//! Input is the serialized [`ExecContext`]; output is an envelope,
//! `{"data": {...}}` or `{"error": {"message": "...", "not_found": bool}}`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use libloading::Library;
use serde::Deserialize;

use crate::logic::{ExecContext, LogicData, LogicError};

/// Version of the exported ABI this server speaks.
pub const ABI_VERSION: u32 = 1;

const SYMBOL_ABI_VERSION: &[u8] = b"trellis_abi_version\0";
const SYMBOL_HANDLE: &[u8] = b"trellis_handle\0";
const SYMBOL_FREE: &[u8] = b"trellis_free\0";

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type HandleFn = unsafe extern "C" fn(input: *const u8, input_len: usize, out_len: *mut usize) -> *mut u8;
type FreeFn = unsafe extern "C" fn(ptr: *mut u8, len: usize);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Envelope {
    Data(LogicData),
    Error {
        message: String,
        #[serde(default)]
        not_found: bool,
    },
}

/// Where the native artifact for `unit` would live.
pub fn artifact_path(unit: &Path) -> PathBuf {
    unit.with_extension(std::env::consts::DLL_EXTENSION)
}

/// Decode a handler's output envelope.
pub fn decode_envelope(output: &[u8]) -> Result<LogicData, LogicError> {
    match serde_json::from_slice(output).map_err(LogicError::Decode)? {
        Envelope::Data(data) => Ok(data),
        Envelope::Error {
            not_found: true, ..
        } => Err(LogicError::NotFound),
        Envelope::Error { message, .. } => Err(LogicError::Exec {
            status: "plugin returned an error".to_string(),
            stderr: message,
        }),
    }
}

/// Loaded libraries, keyed by artifact path. Handles live for the
/// process lifetime.
#[derive(Debug, Default)]
pub struct PluginCache {
    handles: DashMap<PathBuf, Arc<Library>>,
}

impl PluginCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the precompiled artifact for `unit`. `Ok(None)` means there is
    /// no artifact and the caller should fall through.
    pub async fn call(&self, unit: &Path, ctx: &ExecContext) -> Result<Option<LogicData>, LogicError> {
        let artifact = artifact_path(unit);
        if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            return Ok(None);
        }

        let library = self.load(&artifact).await?;
        let input = serde_json::to_vec(ctx).map_err(LogicError::Decode)?;

        let path = artifact.clone();
        let output = tokio::task::spawn_blocking(move || invoke(&library, &path, &input))
            .await
            .map_err(|_| LogicError::PluginPanicked {
                path: artifact.clone(),
            })??;

        decode_envelope(&output).map(Some)
    }

    async fn load(&self, artifact: &Path) -> Result<Arc<Library>, LogicError> {
        if let Some(library) = self.handles.get(artifact) {
            return Ok(library.clone());
        }

        let path = artifact.to_path_buf();
        // SAFETY: loading runs the library's initializers; artifacts are
        // trusted site code built for this server.
        let library = tokio::task::spawn_blocking(move || unsafe { Library::new(&path) })
            .await
            .map_err(|_| LogicError::PluginPanicked {
                path: artifact.to_path_buf(),
            })?
            .map_err(|source| LogicError::PluginLoad {
                path: artifact.to_path_buf(),
                source,
            })?;

        tracing::info!(artifact = %artifact.display(), "Plugin loaded");
        Ok(self
            .handles
            .entry(artifact.to_path_buf())
            .or_insert_with(|| Arc::new(library))
            .clone())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

fn invalid(path: &Path, reason: impl Into<String>) -> LogicError {
    LogicError::InvalidPlugin {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn invoke(library: &Library, path: &Path, input: &[u8]) -> Result<Vec<u8>, LogicError> {
    // SAFETY: the symbol signatures are fixed by the ABI, and the version
    // check runs before any other symbol is called.
    unsafe {
        let version = library
            .get::<AbiVersionFn>(SYMBOL_ABI_VERSION)
            .map_err(|e| invalid(path, format!("missing entry point trellis_abi_version: {e}")))?;
        let found = version();
        if found != ABI_VERSION {
            return Err(invalid(
                path,
                format!("unexpected ABI version {found}, expected {ABI_VERSION}"),
            ));
        }

        let handle = library
            .get::<HandleFn>(SYMBOL_HANDLE)
            .map_err(|e| invalid(path, format!("missing entry point trellis_handle: {e}")))?;
        let free = library
            .get::<FreeFn>(SYMBOL_FREE)
            .map_err(|e| invalid(path, format!("missing entry point trellis_free: {e}")))?;

        let mut out_len = 0usize;
        let ptr = handle(input.as_ptr(), input.len(), &mut out_len);
        if ptr.is_null() {
            return Err(invalid(path, "handler returned no output"));
        }
        let output = std::slice::from_raw_parts(ptr, out_len).to_vec();
        free(ptr, out_len);
        Ok(output)
    }
}
