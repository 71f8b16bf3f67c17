//! Route pattern compilation and matching.
//!
//! # Responsibilities
//! - Compile directory segments into an anchored pattern
//! - Capture one value per parameter segment
//! - Strip a suffix declared by the raw segment (`_id.json`) from values
//!
//! # Design Decisions
//! - Literal segments are regex-escaped, so a directory name never acts
//!   as a pattern
//! - Paths are matched without leading/trailing slashes
//! - A parameter matches exactly one segment (`[^/]+`)

use std::collections::BTreeMap;

use regex::Regex;

/// Prefix marking a directory as a parameter segment.
pub const PARAM_PREFIX: char = '_';

/// Resolved path parameters, by name.
pub type Params = BTreeMap<String, String>;

/// A compiled path pattern with its parameter names.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    regex: Regex,
    /// Names exposed to logic units (`id` for `_id.json`).
    param_keys: Vec<String>,
    /// Segment text after the prefix (`id.json`), used for suffix stripping.
    raw_keys: Vec<String>,
}

impl RoutePattern {
    /// Compile a pattern from path segments, e.g. `["posts", "_id"]`.
    pub fn compile<S: AsRef<str>>(segments: &[S]) -> Result<Self, regex::Error> {
        let mut param_keys = Vec::new();
        let mut raw_keys = Vec::new();
        let mut parts = Vec::with_capacity(segments.len());

        for segment in segments {
            let segment = segment.as_ref();
            match segment.strip_prefix(PARAM_PREFIX) {
                Some(raw) => {
                    let suffix = extension(raw);
                    param_keys.push(raw[..raw.len() - suffix.len()].to_string());
                    raw_keys.push(raw.to_string());
                    parts.push("([^/]+)".to_string());
                }
                None => parts.push(regex::escape(segment)),
            }
        }

        let regex = Regex::new(&format!("^{}$", parts.join("/")))?;
        Ok(Self {
            regex,
            param_keys,
            raw_keys,
        })
    }

    /// Match a normalized path (no surrounding slashes) and extract params.
    pub fn captures(&self, path: &str) -> Option<Params> {
        let caps = self.regex.captures(path)?;
        let mut params = Params::new();

        for (i, (key, raw)) in self.param_keys.iter().zip(&self.raw_keys).enumerate() {
            let mut value = caps.get(i + 1).map_or("", |m| m.as_str());
            let suffix = extension(raw);
            if !suffix.is_empty() {
                value = value.strip_suffix(suffix).unwrap_or(value);
            }
            params.insert(key.clone(), value.to_string());
        }

        Some(params)
    }

    /// True if any segment is a parameter.
    pub fn is_dynamic(&self) -> bool {
        !self.param_keys.is_empty()
    }

    pub fn param_keys(&self) -> &[String] {
        &self.param_keys
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// The extension of a raw segment including its dot, or `""`.
fn extension(raw: &str) -> &str {
    raw.rfind('.').map_or("", |i| &raw[i..])
}
