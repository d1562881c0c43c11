//! # Cache Types
//!
//! This module defines common types used across the caching system.

use std::fmt;
use std::path::{Path, PathBuf};

/// The two on-disk areas of the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Bytes exactly as fetched, possibly still encrypted
    Raw,
    /// Decrypted bytes
    Clear,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Raw => "raw",
            Partition::Clear => "clear",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Filesystem-safe name derived from a locator and an optional MIME hint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub(crate) fn from_encoded(encoded: String) -> Self {
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A (partition, key) pair resolved to a concrete path.
///
/// The file existing at `path` is the only proof that the entry is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    partition: Partition,
    key: CacheKey,
    path: PathBuf,
}

impl CachedFile {
    pub(crate) fn new(partition: Partition, key: CacheKey, path: PathBuf) -> Self {
        Self {
            partition,
            key,
            path,
        }
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Configuration for the cache system
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory holding both partitions
    pub cache_root: Option<PathBuf>,
    /// Directory name of the raw partition under the root
    pub raw_dir_name: String,
    /// Directory name of the clear partition under the root
    pub clear_dir_name: String,
}

impl CacheConfig {
    /// Configuration rooted at `base/<session_id>`
    pub fn for_session(base: impl AsRef<Path>, session_id: &str) -> Self {
        Self {
            cache_root: Some(base.as_ref().join(session_id)),
            ..Self::default()
        }
    }

    /// The effective root directory, falling back to the system temp dir
    pub fn root(&self) -> PathBuf {
        self.cache_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("media-cache"))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: None, // If None, we'll use system temp dir
            raw_dir_name: "downloads".to_string(),
            clear_dir_name: "decrypted".to_string(),
        }
    }
}
